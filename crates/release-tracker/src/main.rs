use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use release_tracker::audit::{self, Play};
use release_tracker::config::{self, TrackerConfig};
use release_tracker::controller::{Controller, NewSong, PromoteRequest};
use release_tracker::lifecycle;
use release_tracker::logging::{self, LogTarget};
use release_tracker::model::{Mode, TrackerView, fmt_date, row_id, text, value_text};
use release_tracker::store::{PostgrestStore, RemoteStore};
use release_tracker::{Result, sanitize};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to the tracker config TOML (missing file = defaults + env)
    #[arg(long, global = true, default_value = "tracker.toml")]
    config: PathBuf,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ListView {
    Scheduled,
    Live,
    Backlog,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetStatus {
    Scheduled,
    Live,
}

impl From<TargetStatus> for TrackerView {
    fn from(s: TargetStatus) -> Self {
        match s {
            TargetStatus::Scheduled => TrackerView::Scheduled,
            TargetStatus::Live => TrackerView::Live,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Terminal UI (tracker + backlog tables, inline editing, bulk cleanup)
    Tui,
    /// Print tracker rows for a sub-view, or the backlog
    List {
        #[arg(long, value_enum, default_value = "scheduled")]
        view: ListView,
        /// Exact artist match
        #[arg(long)]
        artist: Option<String>,
        /// Case-insensitive substring search
        #[arg(long)]
        search: Option<String>,
    },
    /// Add a song to the backlog
    AddSong {
        #[arg(long)]
        artist: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        bpm: Option<String>,
        #[arg(long)]
        key_root: Option<String>,
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        genre: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Create a tracker entry from a backlog song and advance its stage
    Promote {
        song_id: i64,
        #[arg(long, value_enum, default_value = "scheduled")]
        status: TargetStatus,
        #[arg(long)]
        release_date: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        streaming_status: Option<String>,
        #[arg(long)]
        video_status: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Count tracker rows a bulk delete from DATE onward would remove
    PreviewDelete {
        /// YYYY-MM-DD, inclusive
        date: String,
        #[arg(long)]
        include_nulls: bool,
    },
    /// Delete tracker rows released on or after DATE
    BulkDelete {
        /// YYYY-MM-DD, inclusive
        date: String,
        #[arg(long)]
        include_nulls: bool,
        /// Skip the interactive confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Move a tracker row back to the backlog
    MarkBacklog {
        id: i64,
        #[arg(long)]
        note: Option<String>,
    },
    /// Set a tracker row to scheduled with a planned date
    MarkScheduled {
        id: i64,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        note: Option<String>,
    },
    /// Set a tracker row live with its public link
    MarkLive {
        id: i64,
        #[arg(long)]
        link: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Archive a tracker row
    Archive {
        id: i64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Record a play event
    LogPlay {
        #[arg(long)]
        platform: String,
        #[arg(long)]
        artist: String,
        #[arg(long)]
        song: String,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let cfg = config::load_or_default(&args.config)?;

    let target = match args.cmd {
        Command::Tui => LogTarget::Dir(PathBuf::from(&cfg.logging.dir)),
        _ => LogTarget::Stderr,
    };
    let log_path = logging::init(&target, args.log_json || cfg.logging.json)?;
    tracing::debug!(config = %args.config.display(), log = ?log_path, "starting");

    let store: Arc<dyn RemoteStore> = Arc::new(PostgrestStore::new(&cfg.resolve_backend()?)?);
    match args.cmd {
        Command::Tui => release_tracker::ui::run_tui(controller(&cfg, store)),
        Command::List {
            view,
            artist,
            search,
        } => cmd_list(&cfg, store, view, artist, search),
        Command::AddSong {
            artist,
            title,
            bpm,
            key_root,
            mode,
            genre,
            notes,
        } => {
            let mut ctrl = controller(&cfg, store);
            let created = ctrl.add_song(&NewSong {
                artist,
                title,
                bpm,
                key_root,
                mode,
                genre,
                notes,
            })?;
            println!("added backlog song #{}", row_id(&created).unwrap_or_default());
            Ok(())
        }
        Command::Promote {
            song_id,
            status,
            release_date,
            category,
            version,
            streaming_status,
            video_status,
            notes,
        } => {
            let mut ctrl = controller(&cfg, store);
            ctrl.refresh()?;
            let created = ctrl.promote(&PromoteRequest {
                song_id,
                status: status.into(),
                release_date,
                category,
                version,
                streaming_status,
                video_status,
                notes,
            })?;
            println!(
                "promoted song #{song_id} to tracker row #{}: {}",
                row_id(&created).unwrap_or_default(),
                sanitize::cell(&lifecycle::describe(&created))
            );
            Ok(())
        }
        Command::PreviewDelete {
            date,
            include_nulls,
        } => {
            let preview = controller(&cfg, store).preview_bulk_delete(&date, include_nulls)?;
            println!("{preview}");
            Ok(())
        }
        Command::BulkDelete {
            date,
            include_nulls,
            yes,
        } => cmd_bulk_delete(&cfg, store, &date, include_nulls, yes),
        Command::MarkBacklog { id, note } => {
            let col = lifecycle::detect_status_column(&*store)?;
            let row = lifecycle::mark_backlog(&*store, col, id, note.as_deref())?;
            println!("{}", sanitize::cell(&lifecycle::describe(&row)));
            Ok(())
        }
        Command::MarkScheduled { id, date, note } => {
            let col = lifecycle::detect_status_column(&*store)?;
            let row = lifecycle::mark_scheduled(&*store, col, id, date, note.as_deref())?;
            println!("{}", sanitize::cell(&lifecycle::describe(&row)));
            Ok(())
        }
        Command::MarkLive { id, link, note } => {
            let col = lifecycle::detect_status_column(&*store)?;
            let row = lifecycle::mark_live(&*store, col, id, &link, note.as_deref())?;
            println!("{}", sanitize::cell(&lifecycle::describe(&row)));
            Ok(())
        }
        Command::Archive { id, reason } => {
            let col = lifecycle::detect_status_column(&*store)?;
            let row = lifecycle::archive(&*store, col, id, reason.as_deref())?;
            println!("archived: {}", sanitize::cell(&lifecycle::describe(&row)));
            Ok(())
        }
        Command::LogPlay {
            platform,
            artist,
            song,
        } => {
            let play = Play {
                platform,
                artist,
                song,
                timestamp: chrono::Utc::now().to_rfc3339(),
            };
            audit::log_play(&*store, &play)?;
            println!("play logged");
            Ok(())
        }
    }
}

fn controller(cfg: &TrackerConfig, store: Arc<dyn RemoteStore>) -> Controller {
    Controller::new(store, cfg.catalog.artists.clone()).with_audit(cfg.audit.enabled)
}

fn cmd_list(
    cfg: &TrackerConfig,
    store: Arc<dyn RemoteStore>,
    view: ListView,
    artist: Option<String>,
    search: Option<String>,
) -> Result<()> {
    let mut ctrl = controller(cfg, store);
    match view {
        ListView::Scheduled => ctrl.refresh()?,
        ListView::Live => ctrl.switch_view(TrackerView::Live)?,
        ListView::Backlog => ctrl.switch_mode(Mode::Backlog)?,
    }
    ctrl.set_artist_filter(artist);
    ctrl.set_query(search.as_deref().unwrap_or_default());

    let rows = ctrl.visible_rows();
    for r in &rows {
        let line = match ctrl.mode() {
            Mode::Tracker => format!(
                "#{:<5} {:<10}  {:<16} {:<28} {}",
                row_id(r).unwrap_or_default(),
                fmt_date(r.get("release_date")),
                text(r, "artist"),
                text(r, "song_title"),
                ctrl.status_column().read(r)
            ),
            Mode::Backlog => format!(
                "#{:<5} {:<16} {:<28} {:>4}  {}",
                row_id(r).unwrap_or_default(),
                text(r, "artist"),
                text(r, "title"),
                value_text(r.get("bpm")),
                text(r, "genre")
            ),
        };
        println!("{}", sanitize::clean(&line, 200));
    }
    eprintln!("{}", ctrl.status().text);
    Ok(())
}

fn cmd_bulk_delete(
    cfg: &TrackerConfig,
    store: Arc<dyn RemoteStore>,
    date: &str,
    include_nulls: bool,
    yes: bool,
) -> Result<()> {
    let mut ctrl = controller(cfg, store);
    let report = ctrl.execute_bulk_delete(date, include_nulls, |preview| {
        yes || confirm_on_stdin(&preview.prompt())
    })?;
    let Some(report) = report else {
        println!("bulk delete cancelled");
        return Ok(());
    };
    let summary = report.summary();
    let deleted = report.into_result()?;
    println!("{summary}");
    tracing::info!(deleted, "bulk delete complete");
    Ok(())
}

fn confirm_on_stdin(prompt: &str) -> bool {
    eprint!("{prompt} [y/N] ");
    io::stderr().flush().ok();
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
