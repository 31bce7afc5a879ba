//! Process plumbing: log output and pidfile.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// Rotated log files kept on disk.
const MAX_LOG_FILES: usize = 10;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global tracing subscriber.
///
/// Logs to stderr, or to a daily-rotated file when `log_file` is set. Keep the
/// returned guard alive for the life of the process so buffered lines flush.
pub fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .init();
        return None;
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mail-relay.log".to_string());

    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
    {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            tracing::error!(path = %path.display(), "Cannot open log file, logging to stderr: {e}");
            None
        }
    }
}

/// Write our pid to `path`. Failures are logged and otherwise ignored.
pub fn write_pidfile(path: &Path) -> bool {
    let pid = std::process::id();
    match std::fs::write(path, format!("{pid}\n")) {
        Ok(()) => {
            tracing::info!("Wrote pid {pid} to {}", path.display());
            true
        }
        Err(e) => {
            tracing::error!("Failed writing pid to {}: {e}", path.display());
            false
        }
    }
}
