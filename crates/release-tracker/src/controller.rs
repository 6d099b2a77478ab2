use std::sync::Arc;
use std::thread;

use chrono::NaiveDate;
use serde_json::{Value, json};

use crate::audit;
use crate::bulk::{self, BulkDeleteReport, BulkDeleteRequest, BulkPreview};
use crate::error::{Error, ErrorKind, Result};
use crate::filter::{FilterState, artist_options};
use crate::lifecycle;
use crate::model::{Mode, Row, SONGS_TABLE, TRACKER_TABLE, Table, TrackerView, row_id, text};
use crate::session::EditSession;
use crate::status::StatusColumn;
use crate::store::{Filter, Order, RemoteStore, tracker_order};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Ok,
    Warn,
    Err,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub kind: StatusKind,
    pub text: String,
}

impl StatusLine {
    fn new(kind: StatusKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerSource {
    View(&'static str),
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    pub seq: u64,
    pub view: TrackerView,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub songs: Vec<Row>,
    pub tracker: Vec<Row>,
    pub source: TrackerSource,
    pub status_column: StatusColumn,
}

pub fn load_songs(store: &dyn RemoteStore) -> Result<Vec<Row>> {
    let backlog = Filter::AnyOf(vec![Filter::is_null("stage"), Filter::eq("stage", "backlog")]);
    store.query(SONGS_TABLE, &[backlog], &[Order::desc("created_at")])
}

pub fn load_tracker(
    store: &dyn RemoteStore,
    view: TrackerView,
) -> Result<(Vec<Row>, TrackerSource, StatusColumn)> {
    let order = tracker_order();
    match store.query(view.relation(), &[], &order) {
        Ok(rows) => {
            let col = StatusColumn::detect(rows.first());
            Ok((rows, TrackerSource::View(view.relation()), col))
        }
        Err(e) => {
            tracing::warn!(relation = view.relation(), error = %e, "view unavailable; filtering base table");
            let all = store.query(TRACKER_TABLE, &[], &order)?;
            let col = StatusColumn::detect(all.first());
            let rows = all
                .into_iter()
                .filter(|r| match view {
                    TrackerView::Live => col.is_live(r),
                    TrackerView::Scheduled => !col.is_live(r),
                })
                .collect();
            Ok((rows, TrackerSource::Fallback, col))
        }
    }
}

pub fn load_snapshot(store: &dyn RemoteStore, ticket: RefreshTicket) -> Result<Snapshot> {
    thread::scope(|s| {
        let songs = s.spawn(|| load_songs(store));
        let tracker = load_tracker(store, ticket.view);
        let songs = songs
            .join()
            .map_err(|_| Error::msg("backlog loader panicked"))?;
        let (tracker, source, status_column) = tracker?;
        Ok(Snapshot {
            songs: songs?,
            tracker,
            source,
            status_column,
        })
    })
}

#[derive(Debug, Clone, Default)]
pub struct NewSong {
    pub artist: String,
    pub title: String,
    pub bpm: Option<String>,
    pub key_root: Option<String>,
    pub mode: Option<String>,
    pub genre: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromoteRequest {
    pub song_id: i64,
    pub status: TrackerView,
    pub release_date: Option<String>,
    pub category: Option<String>,
    pub version: Option<String>,
    pub streaming_status: Option<String>,
    pub video_status: Option<String>,
    pub notes: Option<String>,
}

impl PromoteRequest {
    pub fn new(song_id: i64) -> Self {
        Self {
            song_id,
            status: TrackerView::Scheduled,
            release_date: None,
            category: None,
            version: None,
            streaming_status: None,
            video_status: None,
            notes: None,
        }
    }
}

fn put_opt(row: &mut Row, key: &str, v: Option<&str>) {
    if let Some(v) = v.map(str::trim).filter(|v| !v.is_empty()) {
        row.insert(key.to_string(), Value::String(v.to_string()));
    }
}

fn or_null(v: Option<&Value>) -> Value {
    v.cloned().unwrap_or(Value::Null)
}

pub struct Controller {
    store: Arc<dyn RemoteStore>,
    mode: Mode,
    view: TrackerView,
    songs: Vec<Row>,
    tracker: Vec<Row>,
    source: Option<TrackerSource>,
    status_column: StatusColumn,
    session: EditSession,
    filter: FilterState,
    status: StatusLine,
    artists: Vec<String>,
    audit: bool,
    next_seq: u64,
    applied_seq: u64,
    min_seq: u64,
}

impl Controller {
    pub fn new(store: Arc<dyn RemoteStore>, artists: Vec<String>) -> Self {
        Self {
            store,
            mode: Mode::Tracker,
            view: TrackerView::Scheduled,
            songs: Vec::new(),
            tracker: Vec::new(),
            source: None,
            status_column: StatusColumn::None,
            session: EditSession::default(),
            filter: FilterState::default(),
            status: StatusLine::new(StatusKind::Info, "Loading…"),
            artists,
            audit: false,
            next_seq: 1,
            applied_seq: 0,
            min_seq: 0,
        }
    }

    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit = enabled;
        self
    }

    pub fn store(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.store)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn view(&self) -> TrackerView {
        self.view
    }

    pub fn songs(&self) -> &[Row] {
        &self.songs
    }

    pub fn tracker(&self) -> &[Row] {
        &self.tracker
    }

    pub fn source(&self) -> Option<TrackerSource> {
        self.source
    }

    pub fn status_column(&self) -> StatusColumn {
        self.status_column
    }

    pub fn session(&self) -> &EditSession {
        &self.session
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn artists(&self) -> &[String] {
        &self.artists
    }

    pub fn set_status(&mut self, kind: StatusKind, text: impl Into<String>) {
        self.status = StatusLine::new(kind, text);
    }

    fn fail<T>(&mut self, prefix: &str, e: Error) -> Result<T> {
        let text = match e.kind() {
            ErrorKind::Validation => e.to_string(),
            _ => format!("{prefix}: {e}"),
        };
        tracing::error!(error = %e, "{prefix}");
        self.status = StatusLine::new(StatusKind::Err, text);
        Err(e)
    }

    fn record(&self, event: &str, data: Value) {
        if self.audit {
            audit::log_event(&*self.store, event, data);
        }
    }

    pub fn active_table(&self) -> Table {
        match self.mode {
            Mode::Tracker => Table::Tracker,
            Mode::Backlog => Table::Songs,
        }
    }

    fn cache(&self, table: Table) -> &[Row] {
        match table {
            Table::Tracker => &self.tracker,
            Table::Songs => &self.songs,
        }
    }

    pub fn visible_rows(&self) -> Vec<&Row> {
        self.filter.apply(self.mode, self.cache(self.active_table()))
    }

    pub fn artist_options(&self) -> Vec<String> {
        artist_options(self.cache(self.active_table()))
    }

    pub fn set_artist_filter(&mut self, artist: Option<String>) {
        self.filter.artist = artist.filter(|a| !a.is_empty());
    }

    pub fn set_query(&mut self, query: &str) {
        self.filter.query = query.to_string();
    }

    // ----- refresh -----

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.status = StatusLine::new(StatusKind::Warn, "Refreshing data…");
        RefreshTicket {
            seq,
            view: self.view,
        }
    }

    // Drops results older than the last applied refresh or issued before the last navigation.
    pub fn finish_refresh(&mut self, ticket: RefreshTicket, loaded: Result<Snapshot>) -> Result<bool> {
        if ticket.seq < self.min_seq || ticket.seq <= self.applied_seq {
            tracing::debug!(
                seq = ticket.seq,
                applied = self.applied_seq,
                "discarding stale refresh"
            );
            return Ok(false);
        }
        let snap = match loaded {
            Ok(s) => s,
            Err(e) => return self.fail("Load failed", e),
        };
        self.applied_seq = ticket.seq;
        self.songs = snap.songs;
        self.tracker = snap.tracker;
        self.source = Some(snap.source);
        self.status_column = snap.status_column;
        tracing::info!(
            seq = ticket.seq,
            view = %ticket.view,
            tracker = self.tracker.len(),
            songs = self.songs.len(),
            source = ?snap.source,
            "caches replaced"
        );
        self.status = StatusLine::new(
            StatusKind::Ok,
            format!(
                "Loaded {} tracker rows ({}) and {} songs.",
                self.tracker.len(),
                self.view,
                self.songs.len()
            ),
        );
        Ok(true)
    }

    pub fn refresh(&mut self) -> Result<()> {
        let ticket = self.begin_refresh();
        let loaded = load_snapshot(&*self.store, ticket);
        self.finish_refresh(ticket, loaded).map(|_| ())
    }

    fn refresh_after(&mut self, done: &str) {
        match self.refresh() {
            Ok(()) => self.status = StatusLine::new(StatusKind::Ok, done),
            Err(e) => {
                self.status = StatusLine::new(StatusKind::Warn, format!("{done} Reload failed: {e}"))
            }
        }
    }

    fn invalidate(&mut self) {
        self.session.cancel();
        self.songs.clear();
        self.tracker.clear();
        self.source = None;
        self.min_seq = self.next_seq;
    }

    // ----- navigation -----

    pub fn switch_mode(&mut self, mode: Mode) -> Result<()> {
        self.invalidate();
        self.mode = mode;
        self.filter = FilterState::default();
        self.refresh()
    }

    pub fn switch_view(&mut self, view: TrackerView) -> Result<()> {
        if self.view == view {
            return Ok(());
        }
        self.invalidate();
        self.view = view;
        self.refresh()
    }

    // ----- inline editing -----

    pub fn begin_edit(&mut self, table: Table, id: i64) -> Result<bool> {
        let Some(row) = self.cache(table).iter().find(|r| row_id(r) == Some(id)).cloned() else {
            return self.fail("Edit failed", Error::not_found(format!("{table} row {id} is not loaded")));
        };
        let col = match table {
            Table::Tracker => self.status_column,
            Table::Songs => StatusColumn::None,
        };
        match self.session.begin(table, &row, col) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.status = StatusLine::new(
                    StatusKind::Warn,
                    "Another row is being edited. Save or cancel it first.",
                );
                Ok(false)
            }
            Err(e) => self.fail("Edit failed", e),
        }
    }

    pub fn set_draft(&mut self, key: &str, input: &str) {
        self.session.set(key, input);
    }

    pub fn set_draft_genre(&mut self, primary: &str, fusion: &str) {
        self.session.set_genre(primary, fusion);
    }

    pub fn commit_edit(&mut self) -> Result<()> {
        let Some((table, id)) = self.session.active().map(|d| (d.table, d.id)) else {
            return self.fail("Save failed", Error::validation("No row is being edited."));
        };
        self.status = StatusLine::new(StatusKind::Warn, "Saving changes…");
        if let Err(e) = self.session.commit(&*self.store) {
            return self.fail("Save failed", e);
        }
        self.record("row_saved", json!({"table": table.name(), "id": id}));
        self.refresh_after(match table {
            Table::Tracker => "Saved tracker row.",
            Table::Songs => "Saved backlog song.",
        });
        Ok(())
    }

    pub fn cancel_edit(&mut self) {
        if self.session.cancel().is_some() {
            self.status = StatusLine::new(StatusKind::Ok, "Edit cancelled.");
        }
    }

    // ----- row delete -----

    pub fn delete_prompts(&self, table: Table, id: i64) -> Option<Vec<String>> {
        let row = self.cache(table).iter().find(|r| row_id(r) == Some(id))?;
        let mut prompts = Vec::new();
        if self.session.is_editing(table, row) {
            prompts.push("You're editing this row. Cancel edit and delete anyway?".to_string());
        }
        prompts.push(match table {
            Table::Tracker => format!(
                "Delete tracker row? {} This cannot be undone.",
                lifecycle::describe(row)
            ),
            Table::Songs => {
                let title = text(row, "title");
                format!(
                    "Delete backlog song? {} | {} This cannot be undone.",
                    text(row, "artist"),
                    if title.is_empty() { "(untitled)" } else { title.as_str() }
                )
            }
        });
        Some(prompts)
    }

    pub fn delete_row(
        &mut self,
        table: Table,
        id: i64,
        mut confirm: impl FnMut(&str) -> bool,
    ) -> Result<bool> {
        let Some(prompts) = self.delete_prompts(table, id) else {
            return self.fail("Delete failed", Error::not_found(format!("{table} row {id} is not loaded")));
        };
        if !prompts.iter().all(|p| confirm(p)) {
            return Ok(false);
        }
        self.session.cancel();
        self.status = StatusLine::new(StatusKind::Warn, "Deleting…");
        if let Err(e) = self.store.delete(table.name(), id) {
            return self.fail("Delete failed", e);
        }
        self.record("row_deleted", json!({"table": table.name(), "id": id}));
        self.refresh_after(match table {
            Table::Tracker => "Deleted tracker row.",
            Table::Songs => "Deleted backlog song.",
        });
        Ok(true)
    }

    // ----- add / promote -----

    pub fn add_song(&mut self, song: &NewSong) -> Result<Row> {
        let artist = song.artist.trim();
        let title = song.title.trim();
        if artist.is_empty() || title.is_empty() {
            return self.fail("Save failed", Error::validation("Artist and Title are required."));
        }
        let mut row = Row::new();
        row.insert("artist".into(), Value::String(artist.to_string()));
        row.insert("title".into(), Value::String(title.to_string()));
        if let Some(bpm) = song.bpm.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            let Ok(n) = bpm.parse::<i64>() else {
                return self.fail("Save failed", Error::validation(format!("BPM must be a whole number, got '{bpm}'.")));
            };
            row.insert("bpm".into(), Value::from(n));
        }
        put_opt(&mut row, "key_root", song.key_root.as_deref());
        put_opt(&mut row, "mode", song.mode.as_deref());
        put_opt(&mut row, "genre", song.genre.as_deref());
        put_opt(&mut row, "notes_performance", song.notes.as_deref());

        self.status = StatusLine::new(StatusKind::Warn, "Saving…");
        let created = match self.store.insert(SONGS_TABLE, &row) {
            Ok(r) => r,
            Err(e) => return self.fail("Save failed", e),
        };
        tracing::info!(id = ?row_id(&created), artist, title, "backlog song added");
        self.record("song_added", json!({"id": row_id(&created), "title": title}));
        self.session.cancel();
        self.refresh_after("Saved.");
        Ok(created)
    }

    pub fn promote(&mut self, req: &PromoteRequest) -> Result<Row> {
        if let Some(d) = req.release_date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            if NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
                return self.fail("Add failed", Error::validation(format!("Invalid release date '{d}'; expected YYYY-MM-DD.")));
            }
        }
        self.status = StatusLine::new(StatusKind::Warn, "Adding…");
        let song = match self.store.query(SONGS_TABLE, &[Filter::id(req.song_id)], &[]) {
            Ok(rows) => rows.into_iter().next(),
            Err(e) => return self.fail("Add failed", e),
        };
        let Some(song) = song else {
            return self.fail("Add failed", Error::not_found("Song not found."));
        };

        let mut payload = Row::new();
        payload.insert("artist".into(), or_null(song.get("artist")));
        payload.insert("song_title".into(), or_null(song.get("title")));
        payload.insert("bpm".into(), or_null(song.get("bpm")));
        payload.insert("genre".into(), or_null(song.get("genre")));
        put_opt(&mut payload, "release_date", req.release_date.as_deref());
        put_opt(&mut payload, "category", req.category.as_deref());
        put_opt(&mut payload, "version", req.version.as_deref());
        put_opt(&mut payload, "streaming_status", req.streaming_status.as_deref());
        put_opt(&mut payload, "video_status", req.video_status.as_deref());
        put_opt(&mut payload, "notes", req.notes.as_deref());

        let desired = req.status.as_str();
        let candidates: Vec<StatusColumn> = match self.status_column {
            StatusColumn::None => vec![StatusColumn::Status, StatusColumn::Streaming],
            col => vec![col],
        };
        let mut created = None;
        let mut last_err = None;
        for col in candidates {
            let mut row = payload.clone();
            col.write(&mut row, desired);
            match self.store.insert(TRACKER_TABLE, &row) {
                Ok(r) => {
                    created = Some(r);
                    break;
                }
                Err(e) if e.is_unknown_column() => {
                    tracing::warn!(column = ?col.name(), error = %e, "status column missing; trying next");
                    last_err = Some(e);
                }
                Err(e) => return self.fail("Add failed", e),
            }
        }
        let Some(created) = created else {
            let e = last_err.unwrap_or_else(|| Error::msg("no status column accepted the insert"));
            return self.fail("Add failed", e);
        };

        let mut stage = Row::new();
        stage.insert("stage".into(), Value::String(desired.to_string()));
        if let Err(e) = self.store.update(SONGS_TABLE, req.song_id, &stage) {
            let _ = self.refresh();
            return self.fail(
                "Add incomplete",
                Error::partial(format!(
                    "added to tracker, but the backlog song's stage was not updated ({})",
                    e.message()
                )),
            );
        }
        self.record(
            "song_promoted",
            json!({"song_id": req.song_id, "tracker_id": row_id(&created), "status": desired}),
        );
        self.session.cancel();
        self.refresh_after("Added to tracker.");
        Ok(created)
    }

    // ----- bulk cleanup -----

    pub fn preview_bulk_delete(&mut self, date: &str, include_nulls: bool) -> Result<BulkPreview> {
        let req = match BulkDeleteRequest::parse(date, include_nulls) {
            Ok(r) => r,
            Err(e) => return self.fail("Preview failed", e),
        };
        self.status = StatusLine::new(StatusKind::Warn, "Calculating…");
        match bulk::preview(&*self.store, &req) {
            Ok(p) => {
                self.status = StatusLine::new(StatusKind::Ok, p.to_string());
                Ok(p)
            }
            Err(e) => self.fail("Preview failed", e),
        }
    }

    pub fn execute_bulk_delete(
        &mut self,
        date: &str,
        include_nulls: bool,
        confirm: impl FnOnce(&BulkPreview) -> bool,
    ) -> Result<Option<BulkDeleteReport>> {
        let preview = self.preview_bulk_delete(date, include_nulls)?;
        if !confirm(&preview) {
            self.status = StatusLine::new(StatusKind::Info, "Bulk delete cancelled.");
            return Ok(None);
        }
        self.session.cancel();
        self.status = StatusLine::new(StatusKind::Warn, "Bulk deleting…");
        let report = bulk::execute(&*self.store, &preview.request);
        self.record(
            "bulk_delete",
            json!({
                "from": preview.request.date_str(),
                "include_nulls": include_nulls,
                "previewed": preview.total(),
                "deleted": report.deleted(),
                "complete": report.is_complete(),
            }),
        );
        let summary = report.summary();
        if report.is_complete() {
            self.refresh_after(&summary);
        } else {
            let _ = self.refresh();
            self.status = StatusLine::new(StatusKind::Err, summary);
        }
        Ok(Some(report))
    }

    pub fn draft_value(&self, key: &str) -> Option<String> {
        self.session.active().map(|d| d.get(key))
    }
}
