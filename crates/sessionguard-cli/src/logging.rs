use std::io;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE_PREFIX: &str = "sessionguard.log";

/// Initialize the tracing subscriber.
///
/// Use RUST_LOG to control the level (default `warn`). With `log_dir`, logs
/// are also written to a daily rolling file there; keep the returned guard
/// alive until exit so buffered lines are flushed.
pub fn init_tracing(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr);

    let Some(dir) = log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) else {
        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(filter)
            .init();
        return None;
    };

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
    Some(guard)
}
