use serde_json::Value;

use crate::model::{Row, value_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusColumn {
    Status,
    Streaming,
    StreamingStatus,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Scheduled,
    Live,
    Unknown,
}

impl Lifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Scheduled => "scheduled",
            Lifecycle::Live => "live",
            Lifecycle::Unknown => "",
        }
    }
}

impl StatusColumn {
    // Detection priority, also the insert fallback order.
    pub const CANDIDATES: [StatusColumn; 3] = [
        StatusColumn::Status,
        StatusColumn::Streaming,
        StatusColumn::StreamingStatus,
    ];

    pub fn detect(sample: Option<&Row>) -> Self {
        let Some(row) = sample else {
            return StatusColumn::None;
        };
        Self::CANDIDATES
            .into_iter()
            .find(|c| c.name().is_some_and(|n| row.contains_key(n)))
            .unwrap_or(StatusColumn::None)
    }

    pub fn name(self) -> Option<&'static str> {
        match self {
            StatusColumn::Status => Some("status"),
            StatusColumn::Streaming => Some("streaming"),
            StatusColumn::StreamingStatus => Some("streaming_status"),
            StatusColumn::None => None,
        }
    }

    pub fn read(self, row: &Row) -> String {
        match self.name() {
            Some(col) => normalize_status(row.get(col)),
            None => String::new(),
        }
    }

    pub fn lifecycle(self, row: &Row) -> Lifecycle {
        if self == StatusColumn::None {
            return Lifecycle::Scheduled;
        }
        if self.is_live(row) {
            return Lifecycle::Live;
        }
        match self.read(row).as_str() {
            "scheduled" => Lifecycle::Scheduled,
            _ => Lifecycle::Unknown,
        }
    }

    pub fn is_live(self, row: &Row) -> bool {
        let Some(col) = self.name() else {
            return false;
        };
        if normalize_status(row.get(col)) == "live" {
            return true;
        }
        // The workflow vocabulary says "Released" where the lifecycle says "live".
        self == StatusColumn::StreamingStatus
            && value_text(row.get("streaming_status")).eq_ignore_ascii_case("released")
    }

    pub fn write(self, patch: &mut Row, raw: &str) -> bool {
        let Some(col) = self.name() else {
            return false;
        };
        let v = normalize_str(raw);
        if v != "scheduled" && v != "live" {
            return false;
        }
        patch.insert(col.to_string(), Value::String(v));
        true
    }
}

pub fn normalize_status(v: Option<&Value>) -> String {
    normalize_str(&value_text(v))
}

fn normalize_str(raw: &str) -> String {
    let s = raw.trim().to_lowercase();
    match s.as_str() {
        "released" | "live" => "live".to_string(),
        _ => s,
    }
}
