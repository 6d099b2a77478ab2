pub const MAX_CELL_CHARS: usize = 120;

#[derive(Clone, Copy)]
enum Skip {
    Intro,
    Csi,
    Str { bel_ends: bool, saw_esc: bool },
}

pub fn clean(input: &str, max: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max + 1));
    let mut skip: Option<Skip> = None;
    let mut kept = 0usize;
    let mut last_space = false;

    for c in input.chars() {
        if let Some(state) = skip {
            skip = match (state, c) {
                (Skip::Intro, '[') => Some(Skip::Csi),
                (Skip::Intro, ']') => Some(Skip::Str {
                    bel_ends: true,
                    saw_esc: false,
                }),
                (Skip::Intro, 'P' | 'X' | '^' | '_') => Some(Skip::Str {
                    bel_ends: false,
                    saw_esc: false,
                }),
                (Skip::Intro, _) => None,
                (Skip::Csi, c) if ('@'..='~').contains(&c) => None,
                (Skip::Csi, _) => Some(Skip::Csi),
                (Skip::Str { bel_ends: true, .. }, '\x07') => None,
                (Skip::Str { saw_esc: true, .. }, '\\') => None,
                (Skip::Str { bel_ends, .. }, c) => Some(Skip::Str {
                    bel_ends,
                    saw_esc: c == '\x1b',
                }),
            };
            continue;
        }
        if c == '\x1b' {
            skip = Some(Skip::Intro);
            continue;
        }
        let c = match c {
            '\n' | '\r' | '\t' => ' ',
            c if c.is_control() || is_invisible_format(c) => continue,
            c => c,
        };
        if c == ' ' && last_space {
            continue;
        }
        if kept == max {
            out.push('…');
            break;
        }
        last_space = c == ' ';
        out.push(c);
        kept += 1;
    }
    out
}

pub fn cell(input: &str) -> String {
    clean(input, MAX_CELL_CHARS)
}

// Bidi overrides and zero-width characters that reorder or hide text.
fn is_invisible_format(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' | '\u{FEFF}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_and_title_sequences() {
        assert_eq!(clean("\x1b[31mRed\x1b[0m Song", 50), "Red Song");
        assert_eq!(clean("a\x1b]0;pwned\x07b", 50), "ab");
        assert_eq!(clean("a\x1bPdata\x1b\\b", 50), "ab");
    }

    #[test]
    fn folds_whitespace_and_drops_controls() {
        assert_eq!(clean("line one\r\n\tline\u{0007} two", 50), "line one line two");
        assert_eq!(clean("ab\u{202E}cd", 50), "abcd");
    }

    #[test]
    fn truncates_with_ellipsis() {
        assert_eq!(clean("abcdef", 3), "abc…");
        assert_eq!(clean("abc", 3), "abc");
    }
}
