use chrono::NaiveDate;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{Row, TRACKER_TABLE, TrackerView, text};
use crate::status::{Lifecycle, StatusColumn};
use crate::store::{Filter, Order, RemoteStore};

pub const DEFAULT_LIVE_NOTE: &str = "Released and live";
pub const DEFAULT_ARCHIVE_REASON: &str = "Superseded by newer version";

pub fn detect_status_column(store: &dyn RemoteStore) -> Result<StatusColumn> {
    let sample = store.sample(TRACKER_TABLE)?;
    Ok(StatusColumn::detect(sample.as_ref()))
}

fn status_patch(col: StatusColumn, status: &str, note: Option<&str>) -> Row {
    let mut patch = Row::new();
    // With no lifecycle column detected, write the current-schema column.
    let name = col.name().unwrap_or("status");
    patch.insert(name.to_string(), Value::String(status.to_string()));
    if let Some(n) = note {
        patch.insert("status_note".into(), Value::String(n.to_string()));
    }
    patch
}

pub fn set_status(
    store: &dyn RemoteStore,
    col: StatusColumn,
    id: i64,
    status: &str,
    note: Option<&str>,
) -> Result<Row> {
    let status = status.trim();
    if status.is_empty() {
        return Err(Error::validation("Status is required."));
    }
    store.update(TRACKER_TABLE, id, &status_patch(col, status, note))
}

pub fn mark_backlog(store: &dyn RemoteStore, col: StatusColumn, id: i64, note: Option<&str>) -> Result<Row> {
    set_status(store, col, id, "backlog", note)
}

pub fn mark_scheduled(
    store: &dyn RemoteStore,
    col: StatusColumn,
    id: i64,
    date: NaiveDate,
    note: Option<&str>,
) -> Result<Row> {
    let mut patch = status_patch(col, "scheduled", note);
    patch.insert(
        "scheduled_release_date".into(),
        Value::String(date.format("%Y-%m-%d").to_string()),
    );
    store.update(TRACKER_TABLE, id, &patch)
}

pub fn mark_live(
    store: &dyn RemoteStore,
    col: StatusColumn,
    id: i64,
    link: &str,
    note: Option<&str>,
) -> Result<Row> {
    let link = link.trim();
    if link.is_empty() {
        return Err(Error::validation("A live link is required."));
    }
    let mut patch = status_patch(col, "live", Some(note.unwrap_or(DEFAULT_LIVE_NOTE)));
    patch.insert("live_link".into(), Value::String(link.to_string()));
    store.update(TRACKER_TABLE, id, &patch)
}

pub fn archive(
    store: &dyn RemoteStore,
    col: StatusColumn,
    id: i64,
    reason: Option<&str>,
) -> Result<Row> {
    let mut patch = status_patch(col, "archived", None);
    patch.insert(
        "archived_reason".into(),
        Value::String(reason.unwrap_or(DEFAULT_ARCHIVE_REASON).to_string()),
    );
    store.update(TRACKER_TABLE, id, &patch)
}

pub fn list_tracks(
    store: &dyn RemoteStore,
    artist: Option<&str>,
    view: Option<TrackerView>,
) -> Result<Vec<Row>> {
    let mut filters = Vec::new();
    if let Some(a) = artist {
        filters.push(Filter::eq("artist", a));
    }
    let rows = store.query(TRACKER_TABLE, &filters, &[Order::asc("created_at")])?;
    let Some(view) = view else {
        return Ok(rows);
    };
    let col = StatusColumn::detect(rows.first());
    Ok(rows
        .into_iter()
        .filter(|r| {
            let live = col.lifecycle(r) == Lifecycle::Live;
            match view {
                TrackerView::Live => live,
                TrackerView::Scheduled => !live,
            }
        })
        .collect())
}

pub fn describe(row: &Row) -> String {
    let date = crate::model::fmt_date(row.get("release_date"));
    let title = text(row, "song_title");
    format!(
        "{} | {} | {}",
        if date.is_empty() { "(no date)" } else { date.as_str() },
        text(row, "artist"),
        if title.is_empty() { "(untitled)" } else { title.as_str() }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            "music_tracker",
            vec![
                json!({"id": 1, "artist": "Ivory Ocean", "song_title": "A", "status": "scheduled"}),
                json!({"id": 2, "artist": "Ivory Haven", "song_title": "B", "status": "Released"}),
            ]
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect(),
        );
        store
    }

    #[test]
    fn mark_live_sets_link_and_default_note() {
        let store = store();
        let col = detect_status_column(&store).unwrap();
        let row = mark_live(&store, col, 1, "https://example.com/a", None).unwrap();
        assert_eq!(row["status"], json!("live"));
        assert_eq!(row["status_note"], json!(DEFAULT_LIVE_NOTE));
        assert_eq!(row["live_link"], json!("https://example.com/a"));
    }

    #[test]
    fn archive_and_schedule() {
        let store = store();
        let row = archive(&store, StatusColumn::Status, 2, None).unwrap();
        assert_eq!(row["status"], json!("archived"));
        assert_eq!(row["archived_reason"], json!(DEFAULT_ARCHIVE_REASON));
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let row = mark_scheduled(&store, StatusColumn::Status, 2, date, Some("moved")).unwrap();
        assert_eq!(row["status"], json!("scheduled"));
        assert_eq!(row["scheduled_release_date"], json!("2025-06-01"));
        assert_eq!(row["status_note"], json!("moved"));
    }

    #[test]
    fn list_filters_by_lifecycle() {
        let store = store();
        let live = list_tracks(&store, None, Some(TrackerView::Live)).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0]["song_title"], json!("B"));
        let ocean = list_tracks(&store, Some("Ivory Ocean"), None).unwrap();
        assert_eq!(ocean.len(), 1);
    }

    #[test]
    fn detection_reads_a_single_sample_row() {
        let store = store();
        assert_eq!(detect_status_column(&store).unwrap(), StatusColumn::Status);
        assert_eq!(store.calls(), vec!["sample music_tracker".to_string()]);
    }

    #[test]
    fn mark_backlog_writes_through_detected_column() {
        let store = MemoryStore::new();
        store.seed(
            "music_tracker",
            vec![json!({"id": 4, "streaming": "live"}).as_object().cloned().unwrap()],
        );
        let col = detect_status_column(&store).unwrap();
        assert_eq!(col, StatusColumn::Streaming);
        let row = mark_backlog(&store, col, 4, Some("needs remaster")).unwrap();
        assert_eq!(row["streaming"], json!("backlog"));
        assert_eq!(row["status_note"], json!("needs remaster"));
        assert!(!row.contains_key("status"));
    }
}
