//! Tracing subscriber setup
//!
//! NIST 800-53: AU-9 (Protection of Audit Information), AU-12 (Audit Generation)
//! Implementation: Text or JSON records to stderr, or to a daily-rolling file
//! through a non-blocking writer

use shellport_core::{LogFormat, LoggingConfig};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// Returns the writer guard when logging to a file; keep it alive for the
/// life of the process. Falls back to stderr when the log directory cannot
/// be created.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = || EnvFilter::new(config.level.clone());

    if let Some((directory, file_name)) = config.file.as_deref().and_then(split_log_path) {
        if let Err(e) = std::fs::create_dir_all(directory) {
            eprintln!("Warning: Failed to create log directory: {}", e);
            eprintln!("Falling back to stderr logging");
        } else {
            let file_appender = tracing_appender::rolling::daily(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            match config.format {
                LogFormat::Json => {
                    tracing_subscriber::fmt()
                        .json()
                        .with_env_filter(filter())
                        .with_writer(non_blocking)
                        .with_current_span(true)
                        .with_span_list(true)
                        .init();
                }
                LogFormat::Text => {
                    tracing_subscriber::fmt()
                        .with_env_filter(filter())
                        .with_writer(non_blocking)
                        .init();
                }
            }
            return Some(guard);
        }
    }

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .init();
        }
    }
    None
}

/// Split a log file path into its directory and file name
fn split_log_path(path: &Path) -> Option<(&Path, &std::ffi::OsStr)> {
    let file_name = path.file_name()?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Some((directory, file_name))
}
