//! Logging module for fs-audit

use std::path::Path;
use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with tracing
///
/// Always logs to stderr; with `log_file` also appends plain lines to that
/// file. A log file that cannot be opened is reported and skipped. Returns a
/// guard that must be kept alive for the duration of the program when a file
/// is used.
pub fn init_logging(log_file: Option<&Path>, verbose: bool) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (opened, failure) = match log_file.map(|path| (path, file_writer(path))) {
        Some((_, Ok(opened))) => (Some(opened), None),
        Some((path, Err(reason))) => (None, Some((path, reason))),
        None => (None, None),
    };

    let (file_layer, guard) = match opened {
        Some((writer, guard)) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    if let Some((path, reason)) = failure {
        warn!("Cannot log to {}: {}; logging to stderr only", path.display(), reason);
    }

    guard
}

fn file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard), String> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| "path has no file name".to_string())?;

    std::fs::create_dir_all(dir)
        .map_err(|e| format!("cannot create log directory {}: {}", dir.display(), e))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(dir)
        .map_err(|e| e.to_string())?;

    Ok(tracing_appender::non_blocking(appender))
}
