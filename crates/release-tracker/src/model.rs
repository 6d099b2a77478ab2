use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

pub type Row = Map<String, Value>;

pub const SONGS_TABLE: &str = "songs";
pub const TRACKER_TABLE: &str = "music_tracker";
pub const LOGS_TABLE: &str = "logs";
pub const PLAYS_TABLE: &str = "plays";

pub const DEFAULT_ARTISTS: &[&str] = &["Ivory Ocean", "Ivory Haven"];

pub const TRACKER_CATEGORIES: &[&str] =
    &["", "Single", "EP", "Album", "Video", "Promo", "Remaster", "Other"];

pub const STREAMING_STATUS: &[&str] = &[
    "",
    "Idea",
    "Demo",
    "Writing",
    "Recording",
    "Mixing",
    "Mastering",
    "Scheduled",
    "Released",
    "On Hold",
];

pub const VIDEO_STATUS: &[&str] = &[
    "",
    "None",
    "Planned",
    "In Progress",
    "Editing",
    "Scheduled",
    "Released",
];

pub const YES_NO: &[&str] = &["", "Yes", "No"];

pub const GENRES_PRIMARY: &[&str] = &[
    "",
    "Tropical House",
    "Progressive House",
    "Future House",
    "Afrobeat / Tropical",
    "Tropical Fusion",
    "Pop",
    "Ballad",
    "80s / Retro",
    "Other",
];

pub const FUSION_WITH: &[&str] = &[
    "",
    "Reggaeton / Latin",
    "Caribbean / Dancehall",
    "Cuban",
    "Brazilian",
    "Afrobeat",
    "R&B / Soul",
    "Other",
];

pub const FUSION_PRIMARY: &str = "Tropical Fusion";

pub const STATUS_VALUES: &[&str] = &["scheduled", "live"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Songs,
    Tracker,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Songs => SONGS_TABLE,
            Table::Tracker => TRACKER_TABLE,
        }
    }

    pub fn title_column(self) -> &'static str {
        match self {
            Table::Songs => "title",
            Table::Tracker => "song_title",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Tracker,
    Backlog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerView {
    Scheduled,
    Live,
}

impl TrackerView {
    pub fn relation(self) -> &'static str {
        match self {
            TrackerView::Scheduled => "v_scheduled",
            TrackerView::Live => "v_live",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrackerView::Scheduled => "scheduled",
            TrackerView::Live => "live",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(TrackerView::Scheduled),
            "live" => Some(TrackerView::Live),
            _ => None,
        }
    }
}

impl fmt::Display for TrackerView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn row_id(row: &Row) -> Option<i64> {
    match row.get("id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn text(row: &Row, key: &str) -> String {
    value_text(row.get(key))
}

pub fn value_text(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn fmt_date(v: Option<&Value>) -> String {
    let s = value_text(v);
    s.chars().take(10).collect()
}

fn composite_genre_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s*\((.+)\)\s*$").expect("composite genre regex"))
}

pub fn split_genre(genre: &str) -> (String, String) {
    match composite_genre_re().captures(genre) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => (genre.to_string(), String::new()),
    }
}

pub fn compose_genre(primary: &str, fusion: &str) -> String {
    if primary == FUSION_PRIMARY && !fusion.is_empty() {
        format!("{FUSION_PRIMARY} ({fusion})")
    } else {
        primary.to_string()
    }
}
