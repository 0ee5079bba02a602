use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Set up console logging plus a daily-rolling JSON log file. The file layer
/// writes under `logs/` unless EXPORTER_LOG_DIR points elsewhere.
pub fn init_logging() {
    let log_dir =
        std::env::var("EXPORTER_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _ = fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, "exporter.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::from_default_env()
        .add_directive("accesslog_exporter=info".parse().expect("static directive"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_writer(file_writer))
        .with(fmt::layer().with_writer(std::io::stdout))
        .init();

    // the appender guard must outlive the process so buffered records flush
    std::mem::forget(guard);
}
