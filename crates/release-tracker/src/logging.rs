use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub enum LogTarget {
    Stderr,
    Dir(PathBuf),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_log_file(dir: &Path) -> Result<(PathBuf, fs::File)> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::msg(format!("failed to create log dir {}: {e}", dir.display()))
    })?;
    let name = format!("tracker-{}.log", chrono::Local::now().format("%Y%m%d"));
    let path = dir.join(name);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::msg(format!("failed to open log file {}: {e}", path.display())))?;
    Ok((path, file))
}

pub fn init(target: &LogTarget, json: bool) -> Result<Option<PathBuf>> {
    let (writer, path) = match target {
        LogTarget::Stderr => (BoxMakeWriter::new(std::io::stderr), None),
        LogTarget::Dir(dir) => {
            let (path, file) = open_log_file(dir)?;
            (BoxMakeWriter::new(Mutex::new(file)), Some(path))
        }
    };
    let ansi = matches!(target, LogTarget::Stderr);

    let registry = Registry::default().with(env_filter());
    let installed = if json {
        registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_ansi(ansi).with_target(false).with_writer(writer))
            .try_init()
    };
    installed.map_err(|e| Error::msg(format!("failed to install tracing subscriber: {e}")))?;
    Ok(path)
}
