//! Logging Infrastructure
//!
//! Writes to stdout, or to a daily rolling file when a log directory is
//! configured. `RUST_LOG` overrides the configured level when set.

use std::path::Path;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "payment-relay";

/// Initialize the logger from `LOG_LEVEL` and `LOG_DIR`
pub fn init_logger_from_env() {
    let level = std::env::var("LOG_LEVEL").ok();
    let dir = std::env::var("LOG_DIR").ok();
    init_logger_with_file(level.as_deref(), dir.as_deref());
}

/// Initialize the logger with optional file output
pub fn init_logger_with_file(log_level: Option<&str>, log_dir: Option<&str>) {
    let level = log_level.unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);

    if let Some(dir) = log_dir {
        let log_path = Path::new(dir);
        if let Err(e) = std::fs::create_dir_all(log_path) {
            eprintln!("Cannot create log directory {dir}: {e}, logging to stdout");
        } else {
            let file_appender = tracing_appender::rolling::daily(log_path, LOG_FILE_PREFIX);
            if subscriber.with_writer(file_appender).with_ansi(false).try_init().is_err() {
                eprintln!("Logger already initialized");
            }
            return;
        }
    }

    if subscriber.try_init().is_err() {
        eprintln!("Logger already initialized");
    }
}
