use serde_json::{Number, Value};

use crate::error::{Error, Result};
use crate::model::{
    Row, STREAMING_STATUS, TRACKER_CATEGORIES, Table, VIDEO_STATUS, YES_NO, compose_genre, row_id,
    split_genre, value_text,
};
use crate::status::StatusColumn;
use crate::store::RemoteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Artist,
    Choice(&'static [&'static str]),
    Genre,
    Status,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn field(key: &'static str, label: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        key,
        label,
        kind,
        required: false,
    }
}

const fn required(key: &'static str, label: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        key,
        label,
        kind,
        required: true,
    }
}

pub const STATUS_KEY: &str = "status";

pub const TRACKER_FIELDS: &[FieldSpec] = &[
    field("release_date", "Release date", FieldKind::Date),
    required("artist", "Artist", FieldKind::Artist),
    required("song_title", "Song title", FieldKind::Text),
    field("category", "Category", FieldKind::Choice(TRACKER_CATEGORIES)),
    field("genre", "Genre", FieldKind::Genre),
    field(STATUS_KEY, "Status", FieldKind::Status),
    field("version", "Version", FieldKind::Text),
    field("bpm", "BPM", FieldKind::Number),
    field("streaming_status", "Streaming", FieldKind::Choice(STREAMING_STATUS)),
    field("video_status", "Video", FieldKind::Choice(VIDEO_STATUS)),
    field("demo_preference", "Demo pref", FieldKind::Text),
    field("pitch_by", "Pitch by", FieldKind::Text),
    field("remaster_needed", "Remaster?", FieldKind::Choice(YES_NO)),
    field("notes", "Notes", FieldKind::Text),
];

pub const SONG_FIELDS: &[FieldSpec] = &[
    required("artist", "Artist", FieldKind::Artist),
    required("title", "Title", FieldKind::Text),
    field("bpm", "BPM", FieldKind::Number),
    field("key_root", "Key root", FieldKind::Text),
    field("mode", "Mode", FieldKind::Text),
    field("genre", "Genre", FieldKind::Text),
    field("notes_performance", "Notes", FieldKind::Text),
];

pub fn fields_for(table: Table) -> &'static [FieldSpec] {
    match table {
        Table::Tracker => TRACKER_FIELDS,
        Table::Songs => SONG_FIELDS,
    }
}

#[derive(Debug, Clone)]
pub struct Draft {
    pub table: Table,
    pub id: i64,
    fields: Row,
    status_column: StatusColumn,
    status: String,
}

impl Draft {
    pub fn get(&self, key: &str) -> String {
        if key == STATUS_KEY && self.table == Table::Tracker {
            return self.status.clone();
        }
        value_text(self.fields.get(key))
    }

    pub fn status_column(&self) -> StatusColumn {
        self.status_column
    }

    pub fn genre_parts(&self) -> (String, String) {
        split_genre(&self.get("genre"))
    }

    pub fn build_patch(&self) -> Result<Row> {
        let specs = fields_for(self.table);
        for spec in specs.iter().filter(|s| s.required) {
            if self.get(spec.key).trim().is_empty() {
                let labels: Vec<&str> = specs
                    .iter()
                    .filter(|s| s.required)
                    .map(|s| s.label)
                    .collect();
                return Err(Error::validation(format!("{} are required.", labels.join(" and "))));
            }
        }

        let mut patch = Row::new();
        for spec in specs {
            if spec.kind == FieldKind::Status {
                continue;
            }
            // Columns the row never had are left alone unless the draft set them.
            if !self.fields.contains_key(spec.key) && !spec.required {
                continue;
            }
            patch.insert(spec.key.to_string(), coerce(spec, self.fields.get(spec.key)));
        }
        if self.table == Table::Tracker {
            self.status_column.write(&mut patch, &self.status);
        }
        Ok(patch)
    }
}

fn coerce(spec: &FieldSpec, v: Option<&Value>) -> Value {
    if let (FieldKind::Number, Some(Value::Number(n))) = (spec.kind, v) {
        return Value::Number(n.clone());
    }
    let raw = value_text(v);
    let s = raw.trim();
    if s.is_empty() {
        return Value::Null;
    }
    match spec.kind {
        FieldKind::Number => parse_number(s).unwrap_or_else(|| {
            tracing::warn!(field = spec.key, input = s, "not a number; saving as null");
            Value::Null
        }),
        FieldKind::Date => Value::String(s.chars().take(10).collect()),
        _ => Value::String(s.to_string()),
    }
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

#[derive(Debug, Default)]
pub struct EditSession {
    draft: Option<Draft>,
}

impl EditSession {
    pub fn active(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.draft.is_some()
    }

    pub fn is_editing(&self, table: Table, row: &Row) -> bool {
        match (&self.draft, row_id(row)) {
            (Some(d), Some(id)) => d.table == table && d.id == id,
            _ => false,
        }
    }

    // A draft on another row blocks; re-entering the same row keeps its draft.
    pub fn begin(&mut self, table: Table, row: &Row, status_column: StatusColumn) -> Result<bool> {
        let Some(id) = row_id(row) else {
            return Err(Error::validation("Cannot edit: row has no id."));
        };
        if let Some(d) = &self.draft {
            return Ok(d.table == table && d.id == id);
        }
        let status = match status_column.read(row).as_str() {
            v @ ("scheduled" | "live") => v.to_string(),
            _ => String::new(),
        };
        self.draft = Some(Draft {
            table,
            id,
            fields: row.clone(),
            status_column,
            status,
        });
        Ok(true)
    }

    pub fn set(&mut self, key: &str, input: &str) {
        let Some(d) = self.draft.as_mut() else {
            return;
        };
        if key == STATUS_KEY && d.table == Table::Tracker {
            d.status = input.trim().to_lowercase();
            return;
        }
        d.fields.insert(key.to_string(), Value::String(input.to_string()));
    }

    pub fn set_genre(&mut self, primary: &str, fusion: &str) {
        let genre = compose_genre(primary, fusion);
        self.set("genre", &genre);
    }

    pub fn cancel(&mut self) -> Option<Draft> {
        self.draft.take()
    }

    pub fn commit(&mut self, store: &dyn RemoteStore) -> Result<Row> {
        let Some(d) = self.draft.as_ref() else {
            return Err(Error::validation("No row is being edited."));
        };
        let patch = d.build_patch()?;
        let saved = store.update(d.table.name(), d.id, &patch)?;
        tracing::info!(table = %d.table, id = d.id, fields = patch.len(), "row saved");
        self.draft = None;
        Ok(saved)
    }
}
