use std::fs::create_dir_all;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_DIR: &str = "logs";

/// Install the global tracing subscriber.
///
/// Logs always go to a daily-rolling file under `logs/`; `log_to_stdout` adds a
/// coloured stdout layer. The filter comes from `LOG_LEVEL` and falls back to
/// `default_filter`. Keep the returned guard alive for the lifetime of the
/// process, dropping it flushes the file writer.
pub fn init_logging(log_file: &str, log_to_stdout: bool, default_filter: &str) -> WorkerGuard {
    if !Path::new(LOG_DIR).exists() {
        create_dir_all(LOG_DIR).ok();
    }

    let file_appender = rolling::daily(LOG_DIR, log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let env_filter =
        EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if log_to_stdout {
        let stdout_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_target(true)
            .with_thread_ids(true);
        registry.with(stdout_layer).init();
    } else {
        registry.init();
    }

    guard
}
