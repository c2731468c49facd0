use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where diagnostic logs go. The TUI owns the terminal, so it logs to a file.
#[derive(Debug, Clone)]
pub enum LogTarget {
    File(PathBuf),
    Stderr,
}

pub fn default_log_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("orthanc-icf")
        .join("orthanc-icf.log")
}

/// Install the global subscriber. Keep the guard alive until exit or buffered lines are lost.
pub fn init(target: &LogTarget) -> Result<WorkerGuard> {
    let (writer, guard, ansi) = match target {
        LogTarget::File(path) => {
            let file = open_log_file(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (writer, guard, false)
        }
        LogTarget::Stderr => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (writer, guard, true)
        }
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(ansi),
        )
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(guard)
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}
