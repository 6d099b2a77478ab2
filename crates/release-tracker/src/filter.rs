use crate::model::{Mode, Row, text};

const TRACKER_SEARCH_FIELDS: &[&str] = &[
    "song_title",
    "notes",
    "genre",
    "streaming_status",
    "video_status",
    "status",
    "streaming",
];

const BACKLOG_SEARCH_FIELDS: &[&str] = &["title", "notes_performance", "genre", "key_root"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    pub artist: Option<String>,
    pub query: String,
}

impl FilterState {
    pub fn is_empty(&self) -> bool {
        self.artist.is_none() && self.query.trim().is_empty()
    }

    pub fn matches(&self, mode: Mode, row: &Row) -> bool {
        if let Some(a) = self.artist.as_deref() {
            if text(row, "artist") != a {
                return false;
            }
        }
        let q = self.query.trim().to_lowercase();
        if q.is_empty() {
            return true;
        }
        let fields = match mode {
            Mode::Tracker => TRACKER_SEARCH_FIELDS,
            Mode::Backlog => BACKLOG_SEARCH_FIELDS,
        };
        let hay = fields
            .iter()
            .map(|f| text(row, f))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        hay.contains(&q)
    }

    pub fn apply<'a>(&self, mode: Mode, rows: &'a [Row]) -> Vec<&'a Row> {
        rows.iter().filter(|r| self.matches(mode, r)).collect()
    }
}

pub fn artist_options(rows: &[Row]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for r in rows {
        let a = text(r, "artist");
        if !a.is_empty() && !out.contains(&a) {
            out.push(a);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Row> {
        [
            json!({"artist": "Ivory Ocean", "song_title": "Sunset Run", "notes": "single"}),
            json!({"artist": "Ivory Haven", "song_title": "Night Drive", "genre": "Pop"}),
            json!({"artist": "Ivory Ocean", "song_title": "Tide", "status": "live"}),
            json!({"artist": null, "song_title": "Orphan"}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
    }

    #[test]
    fn artist_and_search_combine() {
        let rows = rows();
        let f = FilterState {
            artist: Some("Ivory Ocean".into()),
            query: "  LIVE ".into(),
        };
        let hits = f.apply(Mode::Tracker, &rows);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["song_title"], json!("Tide"));
    }

    #[test]
    fn search_uses_mode_specific_fields() {
        let song = json!({"title": "Sunset Run", "key_root": "C#"}).as_object().cloned().unwrap();
        let f = FilterState {
            artist: None,
            query: "c#".into(),
        };
        assert!(f.matches(Mode::Backlog, &song));
        assert!(!f.matches(Mode::Tracker, &song));
    }

    #[test]
    fn artist_options_are_unique_and_non_empty() {
        assert_eq!(artist_options(&rows()), vec!["Ivory Ocean", "Ivory Haven"]);
    }
}
