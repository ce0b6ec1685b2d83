use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const ENV_LOG_DIR: &str = "METASCOPE_LOG_DIR";

/// `$METASCOPE_LOG_DIR`, else `~/.metascope/logs`.
pub fn log_dir() -> PathBuf {
    match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".metascope")
            .join("logs"),
    }
}

/// Install the global subscriber. Keep the returned guard alive until exit so the
/// file writer flushes.
pub fn init_logging(component: &str, to_stderr: bool) -> WorkerGuard {
    let log_dir = log_dir();
    let _ = std::fs::create_dir_all(&log_dir);

    // Daily files named after the component, e.g. cli.log.2026-10-19
    let file_appender = tracing_appender::rolling::daily(&log_dir, format!("{component}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if to_stderr {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false);
        let _ = registry.with(stderr_layer).try_init();
    } else {
        let _ = registry.try_init();
    }

    guard
}
