use std::io::{self, Stdout};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Frame;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, Paragraph, Row as TableRow, Table as TableWidget,
    TableState, Tabs, Widget, Wrap,
};

use crate::bulk::BulkPreview;
use crate::controller::{
    Controller, NewSong, PromoteRequest, RefreshTicket, Snapshot, StatusKind, TrackerSource,
    load_snapshot,
};
use crate::error::{Error, ErrorKind, Result};
use crate::model::{
    FUSION_PRIMARY, FUSION_WITH, GENRES_PRIMARY, Mode, STATUS_VALUES, STREAMING_STATUS,
    TRACKER_CATEGORIES, Table, TrackerView, VIDEO_STATUS, fmt_date, row_id, split_genre,
    value_text,
};
use crate::sanitize;
use crate::session::{FieldKind, FieldSpec, STATUS_KEY, fields_for};

type RefreshResult = (RefreshTicket, Result<Snapshot>);

type Column = (&'static str, &'static str, u16);

const TRACKER_COLUMNS: &[Column] = &[
    ("release_date", "Date", 10),
    ("artist", "Artist", 14),
    ("song_title", "Title", 24),
    ("category", "Category", 9),
    (STATUS_KEY, "Status", 9),
    ("streaming_status", "Streaming", 11),
    ("video_status", "Video", 11),
    ("notes", "Notes", 16),
];

const BACKLOG_COLUMNS: &[Column] = &[
    ("artist", "Artist", 14),
    ("title", "Title", 24),
    ("bpm", "BPM", 5),
    ("key_root", "Key", 5),
    ("mode", "Mode", 6),
    ("genre", "Genre", 22),
    ("created_at", "Added", 10),
    ("notes_performance", "Notes", 16),
];

#[derive(Debug, Clone)]
struct FormField {
    key: &'static str,
    label: &'static str,
    value: String,
    choices: Vec<String>,
}

impl FormField {
    fn text(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            value: String::new(),
            choices: Vec::new(),
        }
    }

    fn choice<S: AsRef<str>>(key: &'static str, label: &'static str, choices: &[S]) -> Self {
        let choices: Vec<String> = choices.iter().map(|c| c.as_ref().to_string()).collect();
        Self {
            key,
            label,
            value: choices.first().cloned().unwrap_or_default(),
            choices,
        }
    }
}

enum FormAction {
    Pending,
    Submit,
    Cancel,
}

#[derive(Debug, Clone)]
struct Form {
    title: &'static str,
    fields: Vec<FormField>,
    cursor: usize,
    error: Option<String>,
}

impl Form {
    fn add_song(artists: &[String]) -> Self {
        Self {
            title: "Add Song",
            fields: vec![
                FormField::choice("artist", "Artist", artists),
                FormField::text("title", "Title"),
                FormField::text("bpm", "BPM"),
                FormField::text("key_root", "Key root"),
                FormField::text("mode", "Mode"),
                FormField::choice("genre", "Genre", GENRES_PRIMARY),
                FormField::text("notes", "Notes"),
            ],
            cursor: 0,
            error: None,
        }
    }

    fn promote() -> Self {
        Self {
            title: "Promote To Tracker",
            fields: vec![
                FormField::choice("status", "Status", STATUS_VALUES),
                FormField::text("release_date", "Release date"),
                FormField::choice("category", "Category", TRACKER_CATEGORIES),
                FormField::text("version", "Version"),
                FormField::choice("streaming_status", "Streaming", STREAMING_STATUS),
                FormField::choice("video_status", "Video", VIDEO_STATUS),
                FormField::text("notes", "Notes"),
            ],
            cursor: 0,
            error: None,
        }
    }

    fn get(&self, key: &str) -> String {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.trim().to_string())
            .unwrap_or_default()
    }

    fn opt(&self, key: &str) -> Option<String> {
        Some(self.get(key)).filter(|v| !v.is_empty())
    }

    fn handle(&mut self, code: KeyCode) -> FormAction {
        let n = self.fields.len();
        match code {
            KeyCode::Esc => return FormAction::Cancel,
            KeyCode::Enter => return FormAction::Submit,
            KeyCode::Tab | KeyCode::Down => self.cursor = (self.cursor + 1) % n,
            KeyCode::BackTab | KeyCode::Up => self.cursor = (self.cursor + n - 1) % n,
            KeyCode::Left | KeyCode::Right => {
                let field = &mut self.fields[self.cursor];
                if !field.choices.is_empty() {
                    let delta = if code == KeyCode::Left { -1 } else { 1 };
                    field.value = cycle(&field.choices, &field.value, delta);
                }
            }
            KeyCode::Backspace => {
                let field = &mut self.fields[self.cursor];
                if field.choices.is_empty() {
                    field.value.pop();
                }
            }
            KeyCode::Char(c) => {
                let field = &mut self.fields[self.cursor];
                if field.choices.is_empty() && c != '\n' && c != '\r' {
                    field.value.push(c);
                }
            }
            _ => {}
        }
        FormAction::Pending
    }
}

#[derive(Debug, Clone)]
enum InputMode {
    Normal,
    EditText {
        key: &'static str,
        label: &'static str,
        buffer: String,
    },
    Search {
        buffer: String,
    },
    AddSong(Form),
    Promote {
        song_id: i64,
        form: Form,
    },
    BulkDate {
        buffer: String,
        include_nulls: bool,
    },
    ConfirmBulk {
        preview: BulkPreview,
    },
    ConfirmDelete {
        table: Table,
        id: i64,
        prompts: Vec<String>,
        step: usize,
    },
}

struct App {
    ctrl: Controller,
    rows: TableState,
    field: usize,
    input: InputMode,
    tx: Sender<RefreshResult>,
    rx: Receiver<RefreshResult>,
    in_flight: usize,
}

impl App {
    fn new(ctrl: Controller) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            ctrl,
            rows: TableState::default(),
            field: 0,
            input: InputMode::Normal,
            tx,
            rx,
            in_flight: 0,
        }
    }

    fn spawn_refresh(&mut self) {
        let ticket = self.ctrl.begin_refresh();
        let store = self.ctrl.store();
        let tx = self.tx.clone();
        self.in_flight += 1;
        thread::spawn(move || {
            let loaded = load_snapshot(&*store, ticket);
            let _ = tx.send((ticket, loaded));
        });
    }

    fn drain_refreshes(&mut self) {
        while let Ok((ticket, loaded)) = self.rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            match self.ctrl.finish_refresh(ticket, loaded) {
                Ok(true) => self.clamp_selection(),
                Ok(false) => {}
                Err(e) => tracing::debug!(seq = ticket.seq, error = %e, "background refresh failed"),
            }
        }
    }

    fn visible_len(&self) -> usize {
        self.ctrl.visible_rows().len()
    }

    fn selected_id(&self) -> Option<i64> {
        let i = self.rows.selected()?;
        self.ctrl.visible_rows().get(i).and_then(|r| row_id(r))
    }

    fn clamp_selection(&mut self) {
        let len = self.visible_len();
        if len == 0 {
            self.rows.select(None);
        } else {
            let i = self.rows.selected().unwrap_or(0).min(len - 1);
            self.rows.select(Some(i));
        }
    }

    fn select_next(&mut self) {
        let len = self.visible_len();
        if len == 0 {
            return;
        }
        let i = self.rows.selected().map(|i| (i + 1).min(len - 1)).unwrap_or(0);
        self.rows.select(Some(i));
    }

    fn select_prev(&mut self) {
        let i = self.rows.selected().unwrap_or(0);
        self.rows.select(Some(i.saturating_sub(1)));
        self.clamp_selection();
    }

    fn after_navigation(&mut self) {
        self.field = 0;
        self.rows.select(Some(0));
        self.clamp_selection();
    }

    fn current_field(&self) -> Option<FieldSpec> {
        let table = self.ctrl.session().active()?.table;
        fields_for(table).get(self.field).copied()
    }

    fn field_count(&self) -> usize {
        self.ctrl
            .session()
            .active()
            .map(|d| fields_for(d.table).len())
            .unwrap_or(0)
    }

    fn activate_field(&mut self) {
        let Some(spec) = self.current_field() else {
            return;
        };
        match spec.kind {
            FieldKind::Text | FieldKind::Number | FieldKind::Date => {
                let current = self.ctrl.draft_value(spec.key).unwrap_or_default();
                let buffer = match spec.kind {
                    FieldKind::Date => current.chars().take(10).collect(),
                    _ => current,
                };
                self.input = InputMode::EditText {
                    key: spec.key,
                    label: spec.label,
                    buffer,
                };
            }
            _ => self.cycle_field(1),
        }
    }

    fn cycle_field(&mut self, delta: isize) {
        let Some(spec) = self.current_field() else {
            return;
        };
        let Some(current) = self.ctrl.draft_value(spec.key) else {
            return;
        };
        let next = match spec.kind {
            FieldKind::Choice(opts) => cycle(opts, &current, delta),
            FieldKind::Status => cycle(STATUS_VALUES, &current, delta),
            FieldKind::Artist => cycle(self.ctrl.artists(), &current, delta),
            FieldKind::Genre => {
                let (primary, fusion) = split_genre(&current);
                let primary = cycle(GENRES_PRIMARY, &primary, delta);
                self.ctrl.set_draft_genre(&primary, &fusion);
                return;
            }
            FieldKind::Text | FieldKind::Number | FieldKind::Date => return,
        };
        self.ctrl.set_draft(spec.key, &next);
    }

    fn cycle_fusion(&mut self, delta: isize) {
        if !matches!(self.current_field(), Some(s) if s.kind == FieldKind::Genre) {
            return;
        }
        let (primary, fusion) = split_genre(&self.ctrl.draft_value("genre").unwrap_or_default());
        if primary != FUSION_PRIMARY {
            self.ctrl.set_status(
                StatusKind::Warn,
                format!("Fusion only applies to {FUSION_PRIMARY}."),
            );
            return;
        }
        let fusion = cycle(FUSION_WITH, &fusion, delta);
        self.ctrl.set_draft_genre(&primary, &fusion);
    }

    fn cycle_artist_filter(&mut self) {
        let options = self.ctrl.artist_options();
        let next = match self.ctrl.filter().artist.as_deref() {
            None => options.first().cloned(),
            Some(cur) => options
                .iter()
                .position(|a| a == cur)
                .and_then(|i| options.get(i + 1).cloned()),
        };
        self.ctrl.set_artist_filter(next);
        self.clamp_selection();
    }

    fn begin_delete(&mut self, table: Table, id: i64) {
        match self.ctrl.delete_prompts(table, id) {
            Some(prompts) => {
                self.input = InputMode::ConfirmDelete {
                    table,
                    id,
                    prompts,
                    step: 0,
                }
            }
            None => self
                .ctrl
                .set_status(StatusKind::Warn, "That row is no longer loaded."),
        }
    }

    fn confirm_bulk(&mut self, preview: BulkPreview) {
        let shown = preview.total();
        let date = preview.request.date_str();
        let include_nulls = preview.request.include_nulls;
        let mut changed = None;
        let outcome = self
            .ctrl
            .execute_bulk_delete(&date, include_nulls, |fresh: &BulkPreview| {
                if fresh.total() == shown {
                    return true;
                }
                changed = Some(fresh.clone());
                false
            });
        if let (Ok(None), Some(fresh)) = (outcome, changed) {
            self.ctrl.set_status(
                StatusKind::Warn,
                "Row count changed since the preview; confirm again.",
            );
            self.input = InputMode::ConfirmBulk { preview: fresh };
        }
        self.clamp_selection();
    }

    fn handle_key(&mut self, code: KeyCode, mods: KeyModifiers) -> Result<bool> {
        if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
            return Ok(true);
        }

        let input = std::mem::replace(&mut self.input, InputMode::Normal);
        match input {
            InputMode::Normal => {}
            InputMode::EditText {
                key,
                label,
                mut buffer,
            } => {
                match code {
                    KeyCode::Esc => {}
                    KeyCode::Enter => self.ctrl.set_draft(key, &buffer),
                    KeyCode::Backspace => {
                        buffer.pop();
                        self.input = InputMode::EditText { key, label, buffer };
                    }
                    KeyCode::Char(c) => {
                        if c != '\n' && c != '\r' {
                            buffer.push(c);
                        }
                        self.input = InputMode::EditText { key, label, buffer };
                    }
                    _ => self.input = InputMode::EditText { key, label, buffer },
                }
                return Ok(false);
            }
            InputMode::Search { mut buffer } => {
                match code {
                    KeyCode::Esc | KeyCode::Enter => {}
                    KeyCode::Backspace => {
                        buffer.pop();
                        self.ctrl.set_query(&buffer);
                        self.input = InputMode::Search { buffer };
                    }
                    KeyCode::Char(c) => {
                        buffer.push(c);
                        self.ctrl.set_query(&buffer);
                        self.input = InputMode::Search { buffer };
                    }
                    _ => self.input = InputMode::Search { buffer },
                }
                self.clamp_selection();
                return Ok(false);
            }
            InputMode::AddSong(mut form) => {
                match form.handle(code) {
                    FormAction::Cancel => {}
                    FormAction::Pending => self.input = InputMode::AddSong(form),
                    FormAction::Submit => {
                        let song = NewSong {
                            artist: form.get("artist"),
                            title: form.get("title"),
                            bpm: form.opt("bpm"),
                            key_root: form.opt("key_root"),
                            mode: form.opt("mode"),
                            genre: form.opt("genre"),
                            notes: form.opt("notes"),
                        };
                        if let Err(e) = self.ctrl.add_song(&song) {
                            form.error = Some(e.to_string());
                            self.input = InputMode::AddSong(form);
                        }
                        self.clamp_selection();
                    }
                }
                return Ok(false);
            }
            InputMode::Promote { song_id, mut form } => {
                match form.handle(code) {
                    FormAction::Cancel => {}
                    FormAction::Pending => self.input = InputMode::Promote { song_id, form },
                    FormAction::Submit => {
                        let req = PromoteRequest {
                            song_id,
                            status: TrackerView::parse(&form.get("status"))
                                .unwrap_or(TrackerView::Scheduled),
                            release_date: form.opt("release_date"),
                            category: form.opt("category"),
                            version: form.opt("version"),
                            streaming_status: form.opt("streaming_status"),
                            video_status: form.opt("video_status"),
                            notes: form.opt("notes"),
                        };
                        match self.ctrl.promote(&req) {
                            Ok(_) => {}
                            // The tracker row exists; retrying would duplicate it.
                            Err(e) if e.kind() == ErrorKind::PartialFailure => {}
                            Err(e) => {
                                form.error = Some(e.to_string());
                                self.input = InputMode::Promote { song_id, form };
                            }
                        }
                        self.clamp_selection();
                    }
                }
                return Ok(false);
            }
            InputMode::BulkDate {
                mut buffer,
                mut include_nulls,
            } => {
                match code {
                    KeyCode::Esc => return Ok(false),
                    KeyCode::Enter => {
                        if let Ok(preview) = self.ctrl.preview_bulk_delete(&buffer, include_nulls) {
                            self.input = InputMode::ConfirmBulk { preview };
                            return Ok(false);
                        }
                    }
                    KeyCode::Tab => include_nulls = !include_nulls,
                    KeyCode::Backspace => {
                        buffer.pop();
                    }
                    KeyCode::Char(c) if c.is_ascii_digit() || c == '-' => buffer.push(c),
                    _ => {}
                }
                self.input = InputMode::BulkDate {
                    buffer,
                    include_nulls,
                };
                return Ok(false);
            }
            InputMode::ConfirmBulk { preview } => {
                match code {
                    KeyCode::Enter | KeyCode::Char('y') => self.confirm_bulk(preview),
                    KeyCode::Esc | KeyCode::Char('n') => {
                        self.ctrl.set_status(StatusKind::Info, "Bulk delete cancelled.");
                    }
                    _ => self.input = InputMode::ConfirmBulk { preview },
                }
                return Ok(false);
            }
            InputMode::ConfirmDelete {
                table,
                id,
                prompts,
                step,
            } => {
                match code {
                    KeyCode::Enter | KeyCode::Char('y') if step + 1 < prompts.len() => {
                        self.input = InputMode::ConfirmDelete {
                            table,
                            id,
                            prompts,
                            step: step + 1,
                        };
                    }
                    KeyCode::Enter | KeyCode::Char('y') => {
                        self.ctrl.delete_row(table, id, |_| true).ok();
                        self.field = 0;
                        self.clamp_selection();
                    }
                    KeyCode::Esc | KeyCode::Char('n') => {
                        self.ctrl.set_status(StatusKind::Info, "Delete cancelled.");
                    }
                    _ => {
                        self.input = InputMode::ConfirmDelete {
                            table,
                            id,
                            prompts,
                            step,
                        }
                    }
                }
                return Ok(false);
            }
        }

        if let Some((table, id)) = self.ctrl.session().active().map(|d| (d.table, d.id)) {
            match code {
                KeyCode::Esc => {
                    self.ctrl.cancel_edit();
                    self.field = 0;
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    self.field = (self.field + 1).min(self.field_count().saturating_sub(1));
                }
                KeyCode::Up | KeyCode::Char('k') => self.field = self.field.saturating_sub(1),
                KeyCode::Enter | KeyCode::Char('e') => self.activate_field(),
                KeyCode::Left | KeyCode::Char('h') => self.cycle_field(-1),
                KeyCode::Right | KeyCode::Char('l') => self.cycle_field(1),
                KeyCode::Char('f') => self.cycle_fusion(1),
                KeyCode::Char('F') => self.cycle_fusion(-1),
                KeyCode::Char('s') => {
                    if self.ctrl.commit_edit().is_ok() {
                        self.field = 0;
                        self.clamp_selection();
                    }
                }
                KeyCode::Char('d') => self.begin_delete(table, id),
                _ => {}
            }
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Esc => {
                if self.ctrl.filter().is_empty() {
                    return Ok(true);
                }
                self.ctrl.set_artist_filter(None);
                self.ctrl.set_query("");
                self.clamp_selection();
            }
            KeyCode::Tab => {
                let next = match self.ctrl.mode() {
                    Mode::Tracker => Mode::Backlog,
                    Mode::Backlog => Mode::Tracker,
                };
                self.ctrl.switch_mode(next).ok();
                self.after_navigation();
            }
            KeyCode::Char('1') if self.ctrl.mode() == Mode::Tracker => {
                self.ctrl.switch_view(TrackerView::Scheduled).ok();
                self.after_navigation();
            }
            KeyCode::Char('2') if self.ctrl.mode() == Mode::Tracker => {
                self.ctrl.switch_view(TrackerView::Live).ok();
                self.after_navigation();
            }
            KeyCode::Down | KeyCode::Char('j') => self.select_next(),
            KeyCode::Up | KeyCode::Char('k') => self.select_prev(),
            KeyCode::Home | KeyCode::Char('g') => {
                self.rows.select(Some(0));
                self.clamp_selection();
            }
            KeyCode::End | KeyCode::Char('G') => {
                self.rows.select(Some(self.visible_len().saturating_sub(1)));
                self.clamp_selection();
            }
            KeyCode::Enter | KeyCode::Char('e') => {
                if let Some(id) = self.selected_id() {
                    self.field = 0;
                    self.ctrl.begin_edit(self.ctrl.active_table(), id).ok();
                }
            }
            KeyCode::Char('d') => {
                if let Some(id) = self.selected_id() {
                    self.begin_delete(self.ctrl.active_table(), id);
                }
            }
            KeyCode::Char('r') => self.spawn_refresh(),
            KeyCode::Char('/') => {
                self.input = InputMode::Search {
                    buffer: self.ctrl.filter().query.clone(),
                };
            }
            KeyCode::Char('a') => self.cycle_artist_filter(),
            KeyCode::Char('c') => {
                self.ctrl.set_artist_filter(None);
                self.ctrl.set_query("");
                self.clamp_selection();
            }
            KeyCode::Char('n') => self.input = InputMode::AddSong(Form::add_song(self.ctrl.artists())),
            KeyCode::Char('p') if self.ctrl.mode() == Mode::Backlog => {
                if let Some(song_id) = self.selected_id() {
                    self.input = InputMode::Promote {
                        song_id,
                        form: Form::promote(),
                    };
                }
            }
            KeyCode::Char('b') if self.ctrl.mode() == Mode::Tracker => {
                self.input = InputMode::BulkDate {
                    buffer: String::new(),
                    include_nulls: false,
                };
            }
            _ => {}
        }
        Ok(false)
    }

    fn draw(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
                Constraint::Length(2),
            ])
            .split(f.area());

        self.draw_header(f, chunks[0]);
        self.draw_tabs(f, chunks[1]);
        self.draw_filter_bar(f, chunks[2]);
        self.draw_main(f, chunks[3]);
        self.draw_status(f, chunks[4]);
        self.draw_footer(f, chunks[5]);

        self.draw_modal(f);
    }

    fn draw_header(&self, f: &mut Frame, area: Rect) {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let crumb = match self.ctrl.mode() {
            Mode::Tracker => format!("tracker > {}", self.ctrl.view()),
            Mode::Backlog => "backlog".to_string(),
        };
        let source = match self.ctrl.source() {
            Some(TrackerSource::View(v)) => format!("view {v}"),
            Some(TrackerSource::Fallback) => "base table (fallback)".to_string(),
            None => "not loaded".to_string(),
        };
        let mut spans = vec![
            Span::styled("Release Tracker", Style::default().fg(Color::Cyan)),
            Span::raw("  "),
            Span::styled(crumb, Style::default().fg(Color::LightBlue)),
            Span::raw("  "),
            Span::styled(source, Style::default().fg(Color::Gray)),
        ];
        if self.in_flight > 0 {
            spans.push(Span::raw("  "));
            spans.push(Span::styled("refreshing…", Style::default().fg(Color::Yellow)));
        }
        spans.push(Span::raw("  "));
        spans.push(Span::styled(now, Style::default().fg(Color::Yellow)));
        let p = Paragraph::new(Text::from(Line::from(spans))).block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_type(BorderType::Plain),
        );
        f.render_widget(p, area);
    }

    fn draw_tabs(&self, f: &mut Frame, area: Rect) {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(24), Constraint::Min(0)])
            .split(area);
        let selected = Style::default()
            .fg(Color::Black)
            .bg(Color::LightYellow)
            .add_modifier(Modifier::BOLD);
        let mode = match self.ctrl.mode() {
            Mode::Tracker => 0,
            Mode::Backlog => 1,
        };
        f.render_widget(
            Tabs::new(vec!["Tracker", "Backlog"])
                .select(mode)
                .highlight_style(selected),
            cols[0],
        );
        if self.ctrl.mode() == Mode::Tracker {
            let view = match self.ctrl.view() {
                TrackerView::Scheduled => 0,
                TrackerView::Live => 1,
            };
            f.render_widget(
                Tabs::new(vec!["1 Scheduled", "2 Live"])
                    .select(view)
                    .highlight_style(selected.bg(Color::LightBlue)),
                cols[1],
            );
        }
    }

    fn draw_filter_bar(&self, f: &mut Frame, area: Rect) {
        let filter = self.ctrl.filter();
        let artist = filter
            .artist
            .as_deref()
            .map(sanitize::cell)
            .unwrap_or_else(|| "all".into());
        let total = match self.ctrl.mode() {
            Mode::Tracker => self.ctrl.tracker().len(),
            Mode::Backlog => self.ctrl.songs().len(),
        };
        let line = Line::from(vec![
            Span::styled("artist: ", Style::default().fg(Color::Gray)),
            Span::raw(artist),
            Span::styled("  search: ", Style::default().fg(Color::Gray)),
            Span::raw(sanitize::cell(&filter.query)),
            Span::styled(
                format!("  {} of {total} rows", self.visible_len()),
                Style::default().fg(Color::DarkGray),
            ),
        ]);
        f.render_widget(Paragraph::new(line), area);
    }

    fn draw_main(&mut self, f: &mut Frame, area: Rect) {
        let editing_here = self
            .ctrl
            .session()
            .active()
            .is_some_and(|d| d.table == self.ctrl.active_table());
        if !editing_here {
            self.draw_table(f, area);
            return;
        }
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
            .split(area);
        self.draw_table(f, cols[0]);
        self.draw_edit_panel(f, cols[1]);
    }

    fn draw_table(&mut self, f: &mut Frame, area: Rect) {
        let (columns, title) = match self.ctrl.mode() {
            Mode::Tracker => (TRACKER_COLUMNS, "Tracker"),
            Mode::Backlog => (BACKLOG_COLUMNS, "Backlog Songs"),
        };
        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded);

        let visible = self.ctrl.visible_rows();
        if visible.is_empty() {
            let msg = if self.ctrl.filter().is_empty() {
                "No rows. [r] Refresh  [n] Add song"
            } else {
                "No rows match the current filters. [c] Clear filters"
            };
            f.render_widget(
                Paragraph::new(msg)
                    .style(Style::default().fg(Color::Gray))
                    .block(block),
                area,
            );
            return;
        }

        let status_column = self.ctrl.status_column();
        let editing = self.ctrl.session().active().map(|d| (d.table, d.id));
        let table = self.ctrl.active_table();
        let rows: Vec<TableRow> = visible
            .iter()
            .map(|r| {
                let cells = columns.iter().map(|(key, _, _)| {
                    let raw = match *key {
                        "release_date" | "created_at" => fmt_date(r.get(*key)),
                        STATUS_KEY => status_column.read(r),
                        k => value_text(r.get(k)),
                    };
                    Cell::from(sanitize::cell(&raw))
                });
                let row = TableRow::new(cells);
                if editing.is_some() && editing == row_id(r).map(|id| (table, id)) {
                    row.style(Style::default().fg(Color::LightYellow).add_modifier(Modifier::BOLD))
                } else {
                    row
                }
            })
            .collect();
        drop(visible);

        let last = columns.len() - 1;
        let widths: Vec<Constraint> = columns
            .iter()
            .enumerate()
            .map(|(i, (_, _, w))| {
                if i == last {
                    Constraint::Min(*w)
                } else {
                    Constraint::Length(*w)
                }
            })
            .collect();
        let header = TableRow::new(columns.iter().map(|(_, h, _)| Cell::from(*h))).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );
        let widget = TableWidget::new(rows, widths)
            .header(header)
            .block(block)
            .row_highlight_style(Style::default().fg(Color::Black).bg(Color::LightYellow))
            .highlight_symbol("> ");
        f.render_stateful_widget(widget, area, &mut self.rows);
    }

    fn draw_edit_panel(&self, f: &mut Frame, area: Rect) {
        let Some(draft) = self.ctrl.session().active() else {
            return;
        };
        let mut lines = Vec::new();
        for (i, spec) in fields_for(draft.table).iter().enumerate() {
            let marker = if i == self.field { "> " } else { "  " };
            let label = if spec.required {
                format!("{}*", spec.label)
            } else {
                spec.label.to_string()
            };
            let value = sanitize::cell(&draft.get(spec.key));
            let value = match spec.kind {
                FieldKind::Text | FieldKind::Number | FieldKind::Date => value,
                _ => format!("< {value} >"),
            };
            let style = if i == self.field {
                Style::default().fg(Color::Black).bg(Color::LightYellow)
            } else {
                Style::default()
            };
            lines.push(Line::from(vec![
                Span::styled(format!("{marker}{label:<13}"), style),
                Span::raw(" "),
                Span::raw(value),
            ]));
        }
        if draft.table == Table::Tracker {
            let col = draft
                .status_column()
                .name()
                .unwrap_or("none (rows read as scheduled)");
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                format!("status column: {col}"),
                Style::default().fg(Color::DarkGray),
            )));
        }
        let p = Paragraph::new(Text::from(lines))
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .title(format!("Editing {} #{}", draft.table, draft.id))
                    .borders(Borders::ALL)
                    .border_type(BorderType::Double),
            );
        f.render_widget(p, area);
    }

    fn draw_status(&self, f: &mut Frame, area: Rect) {
        let status = self.ctrl.status();
        let color = match status.kind {
            StatusKind::Info => Color::Gray,
            StatusKind::Ok => Color::Green,
            StatusKind::Warn => Color::Yellow,
            StatusKind::Err => Color::Red,
        };
        f.render_widget(
            Paragraph::new(sanitize::clean(&status.text, 400)).style(Style::default().fg(color)),
            area,
        );
    }

    fn draw_footer(&self, f: &mut Frame, area: Rect) {
        let hint = match (&self.input, self.ctrl.session().is_active(), self.ctrl.mode()) {
            (InputMode::Normal, true, _) => {
                "[j/k] Field  [Enter/e] Edit  [h/l] Cycle  [f/F] Fusion  [s] Save  [d] Delete  [Esc] Cancel edit"
            }
            (InputMode::Normal, false, Mode::Tracker) => {
                "[Tab] Backlog  [1/2] Scheduled/Live  [j/k] Move  [e] Edit  [d] Delete  [b] Bulk delete  [/] Search  [a] Artist  [c] Clear  [n] Add song  [r] Refresh  [q] Quit"
            }
            (InputMode::Normal, false, Mode::Backlog) => {
                "[Tab] Tracker  [j/k] Move  [e] Edit  [d] Delete  [p] Promote  [/] Search  [a] Artist  [c] Clear  [n] Add song  [r] Refresh  [q] Quit"
            }
            (InputMode::AddSong(_) | InputMode::Promote { .. }, _, _) => {
                "[Tab/Up/Down] Field  [Left/Right] Choice  [Enter] Save  [Esc] Cancel"
            }
            (InputMode::BulkDate { .. }, _, _) => {
                "[0-9 -] Date  [Tab] Toggle null dates  [Enter] Preview  [Esc] Cancel"
            }
            (InputMode::ConfirmBulk { .. } | InputMode::ConfirmDelete { .. }, _, _) => {
                "[y/Enter] Confirm  [n/Esc] Cancel"
            }
            (InputMode::EditText { .. } | InputMode::Search { .. }, _, _) => {
                "[Enter] Apply  [Esc] Close"
            }
        };
        let p = Paragraph::new(hint)
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::TOP));
        f.render_widget(p, area);
    }

    fn draw_modal(&self, f: &mut Frame) {
        match &self.input {
            InputMode::Normal => {}
            InputMode::EditText { label, buffer, .. } => {
                let lines = vec![
                    Line::from(vec![
                        Span::styled("Edit: ", Style::default().fg(Color::Yellow)),
                        Span::raw(*label),
                    ]),
                    Line::from("enter=apply  esc=cancel"),
                    Line::from(""),
                    Line::from(buffer.clone()),
                ];
                modal(f, 70, 25, "Edit Field", lines);
            }
            InputMode::Search { buffer } => {
                let lines = vec![
                    Line::from("Filter rows (case-insensitive):"),
                    Line::from(""),
                    Line::from(format!("/{buffer}")),
                ];
                modal(f, 60, 20, "Search", lines);
            }
            InputMode::AddSong(form) | InputMode::Promote { form, .. } => {
                let mut lines = Vec::new();
                if let Some(e) = &form.error {
                    lines.push(Line::from(Span::styled(
                        format!("error: {e}"),
                        Style::default().fg(Color::Red),
                    )));
                    lines.push(Line::from(""));
                }
                for (i, field) in form.fields.iter().enumerate() {
                    let style = if i == form.cursor {
                        Style::default().fg(Color::Black).bg(Color::LightYellow)
                    } else {
                        Style::default()
                    };
                    let value = if field.choices.is_empty() {
                        field.value.clone()
                    } else {
                        format!("< {} >", field.value)
                    };
                    lines.push(Line::from(vec![
                        Span::styled(format!("{:<14}", field.label), style),
                        Span::raw(" "),
                        Span::raw(value),
                    ]));
                }
                modal(f, 70, 50, form.title, lines);
            }
            InputMode::BulkDate {
                buffer,
                include_nulls,
            } => {
                let mark = if *include_nulls { "[x]" } else { "[ ]" };
                let lines = vec![
                    Line::from("Delete tracker rows released on or after (YYYY-MM-DD):"),
                    Line::from(""),
                    Line::from(Span::styled(
                        buffer.clone(),
                        Style::default().add_modifier(Modifier::BOLD),
                    )),
                    Line::from(""),
                    Line::from(format!("{mark} also rows with no release date")),
                ];
                modal(f, 70, 30, "Bulk Delete", lines);
            }
            InputMode::ConfirmBulk { preview } => {
                let mut lines = vec![
                    Line::from(Span::styled(
                        preview.prompt(),
                        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                    )),
                    Line::from(""),
                    Line::from(format!("dated rows: {}", preview.in_range)),
                ];
                if let Some(n) = preview.null_dated {
                    lines.push(Line::from(format!("rows without a date: {n}")));
                }
                lines.push(Line::from(""));
                lines.push(Line::from("y/enter=delete  n/esc=cancel"));
                modal(f, 70, 35, "Confirm Bulk Delete", lines);
            }
            InputMode::ConfirmDelete { prompts, step, .. } => {
                let prompt = prompts.get(*step).cloned().unwrap_or_default();
                let lines = vec![
                    Line::from(Span::styled(
                        sanitize::clean(&prompt, 400),
                        Style::default().fg(Color::Red),
                    )),
                    Line::from(""),
                    Line::from("y/enter=confirm  n/esc=cancel"),
                ];
                modal(f, 70, 30, "Confirm Delete", lines);
            }
        }
    }
}

fn cycle<S: AsRef<str>>(options: &[S], current: &str, delta: isize) -> String {
    let n = options.len();
    if n == 0 {
        return current.to_string();
    }
    let next = match options.iter().position(|o| o.as_ref() == current) {
        Some(i) => (i as isize + delta).rem_euclid(n as isize) as usize,
        None if delta < 0 => n - 1,
        None => 0,
    };
    options[next].as_ref().to_string()
}

fn modal(f: &mut Frame, pct_x: u16, pct_y: u16, title: &str, lines: Vec<Line<'_>>) {
    let area = centered_rect(pct_x, pct_y, f.area());
    let shadow = shadow_rect(area, f.area());
    f.render_widget(
        Fill {
            style: Style::default()
                .bg(Color::Black)
                .add_modifier(Modifier::DIM),
        },
        shadow,
    );
    f.render_widget(Clear, area);
    let p = Paragraph::new(Text::from(lines))
        .style(Style::default().fg(Color::White).bg(Color::DarkGray))
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title(title.to_string())
                .borders(Borders::ALL)
                .border_type(BorderType::Double),
        );
    f.render_widget(p, area);
}

pub fn run_tui(ctrl: Controller) -> Result<()> {
    let mut stdout = io::stdout();
    enable_raw_mode().map_err(|e| Error::msg(e.to_string()))?;
    execute!(stdout, EnterAlternateScreen, Hide).map_err(|e| Error::msg(e.to_string()))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).map_err(|e| Error::msg(e.to_string()))?;
    terminal
        .clear()
        .map_err(|e| Error::msg(format!("tui clear failed: {e}")))?;

    let result = run_loop(&mut terminal, App::new(ctrl));

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen, Show).ok();
    result
}

fn run_loop(terminal: &mut Terminal<CrosstermBackend<Stdout>>, mut app: App) -> Result<()> {
    let tick = Duration::from_millis(100);
    app.spawn_refresh();
    loop {
        app.drain_refreshes();
        let mut draw_panicked = false;
        let draw_result = terminal.draw(|f| {
            if catch_unwind(AssertUnwindSafe(|| app.draw(f))).is_err() {
                draw_panicked = true;
            }
        });
        if draw_panicked {
            tracing::error!("draw panicked; clearing terminal");
            app.ctrl.set_status(StatusKind::Err, "Render failed; screen reset.");
            let _ = terminal.clear();
            continue;
        }
        if let Err(e) = draw_result {
            tracing::error!(error = %e, "draw failed");
            let _ = terminal.clear();
            continue;
        }

        if event::poll(tick).map_err(|e| Error::msg(e.to_string()))? {
            if let Event::Key(k) = event::read().map_err(|e| Error::msg(e.to_string()))? {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if app.handle_key(k.code, k.modifiers)? {
                    break;
                }
            }
        }
    }
    if app.ctrl.session().is_active() {
        tracing::info!("exiting with an open draft; discarded");
    }
    Ok(())
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r)[1];
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical)[1]
}

fn shadow_rect(inner: Rect, bounds: Rect) -> Rect {
    let max_x = bounds.x.saturating_add(bounds.width);
    let max_y = bounds.y.saturating_add(bounds.height);
    let x = inner.x.saturating_add(1).min(max_x.saturating_sub(1));
    let y = inner.y.saturating_add(1).min(max_y.saturating_sub(1));
    Rect {
        x,
        y,
        width: inner.width.min(max_x.saturating_sub(x)),
        height: inner.height.min(max_y.saturating_sub(y)),
    }
}

struct Fill {
    style: Style,
}

impl Widget for Fill {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for y in area.y..area.y.saturating_add(area.height) {
            for x in area.x..area.x.saturating_add(area.width) {
                buf[(x, y)].set_char(' ').set_style(self.style);
            }
        }
    }
}
