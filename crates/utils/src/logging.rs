//! provides logging helpers

use std::path::Path;
use std::path::PathBuf;

use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::InitError;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

fn env_filter(default_level: filter::LevelFilter) -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy()
}

/// Splits a log file path into the directory and the file name prefix used by the appender.
fn log_file_parts(log_file: &Path) -> Option<(PathBuf, String)> {
    let file_name = log_file.file_name()?.to_str()?.to_string();
    let dir = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((dir, file_name))
}

/// Daily-rotating writer for `log_file`, keeping at most three files.
fn file_writer(log_file: Option<&Path>) -> Result<Option<(NonBlocking, WorkerGuard)>, InitError> {
    let Some((dir, prefix)) = log_file.and_then(log_file_parts) else {
        return Ok(None);
    };
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)?;
    Ok(Some(tracing_appender::non_blocking(appender)))
}

/// initiate the global tracing subscriber
///
/// `RUST_LOG` overrides `default_level`. When `log_file` is set, events are
/// also written to a daily-rotating file; keep the returned guard alive until
/// exit or buffered lines are lost.
pub fn init(
    default_level: filter::LevelFilter,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>, InitError> {
    let stderr_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter(default_level));

    let (file_layer, guard) = match file_writer(log_file)? {
        Some((writer, guard)) => (
            Some(
                layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(env_filter(default_level)),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    registry().with(stderr_layer).with(file_layer).init();
    Ok(guard)
}
