use std::sync::Arc;

use chrono::NaiveDate;
use release_tracker::controller::{Controller, NewSong, PromoteRequest, TrackerSource};
use release_tracker::error::ErrorKind;
use release_tracker::lifecycle;
use release_tracker::model::{
    LOGS_TABLE, Mode, Row, SONGS_TABLE, TRACKER_TABLE, Table, TrackerView, row_id,
};
use release_tracker::status::StatusColumn;
use release_tracker::store::memory::Op;
use release_tracker::store::MemoryStore;
use release_tracker::Error;
use serde_json::{Value, json};

fn rows(values: Vec<Value>) -> Vec<Row> {
    values
        .into_iter()
        .map(|v| v.as_object().cloned().expect("object"))
        .collect()
}

fn controller(store: &Arc<MemoryStore>) -> Controller {
    let mut c = Controller::new(store.clone(), vec!["Ivory Ocean".into(), "Ivory Haven".into()]);
    c.refresh().expect("initial refresh");
    c
}

#[test]
fn bulk_delete_removes_exactly_what_was_previewed() {
    let store = Arc::new(MemoryStore::new().with_tracker_views());
    store.seed(
        TRACKER_TABLE,
        rows(vec![
            json!({"id": 1, "release_date": "2025-01-10", "status": "scheduled"}),
            json!({"id": 2, "release_date": null, "status": "scheduled"}),
            json!({"id": 3, "release_date": "2025-02-01", "status": "scheduled"}),
        ]),
    );
    let mut c = controller(&store);

    let without = c.preview_bulk_delete("2025-01-15", false).expect("preview");
    assert_eq!(without.total(), 1);
    let with = c.preview_bulk_delete("2025-01-15", true).expect("preview");
    assert_eq!(with.total(), 2);

    let mut asked = None;
    let report = c
        .execute_bulk_delete("2025-01-15", true, |p| {
            asked = Some(p.total());
            true
        })
        .expect("bulk delete")
        .expect("confirmed");
    assert_eq!(asked, Some(2));
    assert!(report.is_complete());
    assert_eq!(report.deleted(), 2);

    let left: Vec<_> = store.rows(TRACKER_TABLE).iter().filter_map(row_id).collect();
    assert_eq!(left, vec![1]);
    assert_eq!(c.tracker().len(), 1);
}

#[test]
fn new_song_promoted_live_moves_between_views() {
    let store = Arc::new(MemoryStore::new().with_tracker_views());
    store.seed(
        TRACKER_TABLE,
        rows(vec![json!({"id": 1, "artist": "Ivory Ocean", "song_title": "Old", "status": "live"})]),
    );
    let mut c = controller(&store).with_audit(true);

    let song = c
        .add_song(&NewSong {
            artist: "Ivory Haven".into(),
            title: "Night Drive".into(),
            bpm: Some("124".into()),
            genre: Some("Tropical Fusion (Cuban)".into()),
            ..Default::default()
        })
        .expect("add song");
    let song_id = row_id(&song).expect("id");
    assert!(c.songs().iter().any(|s| row_id(s) == Some(song_id)));

    // Scheduled view is empty; the only sample is in the live view.
    assert!(c.tracker().is_empty());
    let mut req = PromoteRequest::new(song_id);
    req.status = TrackerView::Live;
    req.release_date = Some("2025-04-04".into());
    req.category = Some("Single".into());
    let created = c.promote(&req).expect("promote");
    assert_eq!(created["status"], json!("live"));
    assert_eq!(created["genre"], json!("Tropical Fusion (Cuban)"));
    assert_eq!(created["bpm"], json!(124));

    assert_eq!(store.row(SONGS_TABLE, song_id).expect("song")["stage"], json!("live"));
    assert!(c.songs().iter().all(|s| row_id(s) != Some(song_id)));

    c.switch_view(TrackerView::Live).expect("live view");
    assert_eq!(c.source(), Some(TrackerSource::View("v_live")));
    let titles: Vec<_> = c.tracker().iter().map(|r| r["song_title"].clone()).collect();
    assert!(titles.contains(&json!("Night Drive")));

    let events: Vec<_> = store
        .rows(LOGS_TABLE)
        .iter()
        .map(|r| r["event"].clone())
        .collect();
    assert_eq!(events, vec![json!("song_added"), json!("song_promoted")]);
}

#[test]
fn audit_failure_does_not_fail_the_operation() {
    let store = Arc::new(MemoryStore::new().with_tracker_views());
    store.fail(Op::Insert, LOGS_TABLE, Error::backend(None, "logs offline"));
    let mut c = controller(&store).with_audit(true);
    c.add_song(&NewSong {
        artist: "Ivory Ocean".into(),
        title: "Tide".into(),
        ..Default::default()
    })
    .expect("add song despite audit failure");
    assert_eq!(store.rows(SONGS_TABLE).len(), 1);
}

#[test]
fn legacy_schema_without_views_filters_client_side() {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        TRACKER_TABLE,
        rows(vec![
            json!({"id": 1, "release_date": "2025-01-01", "streaming": "Released"}),
            json!({"id": 2, "release_date": "2025-02-01", "streaming": " scheduled "}),
            json!({"id": 3, "release_date": "2025-03-01", "streaming": "LIVE"}),
        ]),
    );
    let mut c = controller(&store);
    assert_eq!(c.source(), Some(TrackerSource::Fallback));
    assert_eq!(c.status_column(), StatusColumn::Streaming);
    let ids: Vec<_> = c.tracker().iter().filter_map(row_id).collect();
    assert_eq!(ids, vec![2]);

    c.switch_view(TrackerView::Live).expect("live");
    let ids: Vec<_> = c.tracker().iter().filter_map(row_id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert!(store.calls().iter().any(|l| l == "query v_live"));
}

#[test]
fn no_status_column_reads_every_row_as_scheduled() {
    let store = Arc::new(MemoryStore::new());
    store.seed(TRACKER_TABLE, rows(vec![json!({"id": 1, "song_title": "Bare"})]));
    let mut c = controller(&store);
    assert_eq!(c.status_column(), StatusColumn::None);
    assert_eq!(c.tracker().len(), 1);
    c.switch_view(TrackerView::Live).expect("live");
    assert!(c.tracker().is_empty());
}

#[test]
fn edit_commit_normalizes_values() {
    let store = Arc::new(MemoryStore::new().with_tracker_views());
    store.seed(
        TRACKER_TABLE,
        rows(vec![json!({
            "id": 1, "artist": "Ivory Ocean", "song_title": "Tide", "status": "scheduled",
            "notes": "draft", "bpm": 100
        })]),
    );
    let mut c = controller(&store);
    assert!(c.begin_edit(Table::Tracker, 1).expect("begin"));
    c.set_draft("notes", "   ");
    c.set_draft("bpm", "fast");
    c.set_draft("status", "Live");
    c.commit_edit().expect("commit");

    let saved = store.row(TRACKER_TABLE, 1).expect("row");
    assert_eq!(saved["notes"], Value::Null);
    assert_eq!(saved["bpm"], Value::Null);
    assert_eq!(saved["status"], json!("live"));
    assert!(c.tracker().is_empty(), "row moved out of the scheduled view");
}

#[test]
fn mode_switch_discards_draft_and_filters() {
    let store = Arc::new(MemoryStore::new().with_tracker_views());
    store.seed(
        TRACKER_TABLE,
        rows(vec![json!({"id": 1, "artist": "Ivory Ocean", "song_title": "A", "status": "scheduled"})]),
    );
    store.seed(SONGS_TABLE, rows(vec![json!({"id": 7, "artist": "Ivory Haven", "title": "B"})]));
    let mut c = controller(&store);
    c.set_artist_filter(Some("Ivory Ocean".into()));
    c.begin_edit(Table::Tracker, 1).expect("begin");
    c.set_draft("song_title", "changed");

    c.switch_mode(Mode::Backlog).expect("backlog");
    assert!(!c.session().is_active());
    assert!(c.filter().is_empty());
    assert_eq!(c.visible_rows().len(), 1);
    assert_eq!(store.row(TRACKER_TABLE, 1).expect("row")["song_title"], json!("A"));
}

#[test]
fn failed_refresh_keeps_previous_caches_visible() {
    let store = Arc::new(MemoryStore::new().with_tracker_views());
    store.seed(TRACKER_TABLE, rows(vec![json!({"id": 1, "status": "scheduled"})]));
    let mut c = controller(&store);
    store.fail(Op::Query, SONGS_TABLE, Error::backend(None, "timeout"));
    let err = c.refresh().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert_eq!(c.tracker().len(), 1);
    assert!(c.status().text.starts_with("Load failed"));
}

#[test]
fn lifecycle_helpers_round_out_the_workflow() {
    let store = MemoryStore::new();
    store.seed(
        TRACKER_TABLE,
        rows(vec![
            json!({"id": 1, "artist": "Ivory Ocean", "song_title": "A", "status": "backlog"}),
            json!({"id": 2, "artist": "Ivory Haven", "song_title": "B", "status": "backlog"}),
        ]),
    );
    let col = lifecycle::detect_status_column(&store).expect("detect");
    let date = NaiveDate::from_ymd_opt(2025, 9, 1).expect("date");
    lifecycle::mark_scheduled(&store, col, 1, date, None).expect("schedule");
    lifecycle::mark_live(&store, col, 2, "https://example.com/b", None).expect("live");

    let live = lifecycle::list_tracks(&store, None, Some(TrackerView::Live)).expect("list");
    assert_eq!(live.iter().filter_map(row_id).collect::<Vec<_>>(), vec![2]);
    let ocean = lifecycle::list_tracks(&store, Some("Ivory Ocean"), None).expect("list");
    assert_eq!(ocean[0]["scheduled_release_date"], json!("2025-09-01"));

    let err = lifecycle::mark_live(&store, col, 1, "  ", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(store.row(TRACKER_TABLE, 1).expect("row")["status"], json!("scheduled"));
}
