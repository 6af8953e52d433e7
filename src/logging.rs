use chrono::Local;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::AqiError;

/// Sets up tracing with INFO+ to console and DEBUG+ from this crate to a file.
///
/// The returned guard must be held for the lifetime of the process, otherwise
/// buffered file output is lost.
pub fn setup_tracing(log_dir: Option<&str>) -> Result<WorkerGuard, AqiError> {
    // Fall back to "logs" when no directory is given
    let log_dir_str = log_dir.unwrap_or("logs");
    let log_dir = Path::new(log_dir_str);
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    // One log file per run, named after the start time
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();

    // Non-blocking writer for the file layer
    let file_appender = tracing_appender::rolling::never(log_dir_str, format!("{}.log", timestamp));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Console layer: INFO and above from everything
    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true) // Colored levels
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_filter(EnvFilter::from_default_env().add_directive(directive("INFO")?));

    // File layer: DEBUG and above from this crate only
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false) // Plain text in files
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_filter(EnvFilter::from_default_env().add_directive(directive("aqi_forecast=DEBUG")?));

    // Combine both layers
    let subscriber = Registry::default().with(console_layer).with(file_layer);

    // Install globally; a second call in the same process fails
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AqiError::ConfigError(format!("Failed to install subscriber: {}", e)))?;

    info!("Tracing initialized. Logs will be written to console and file.");

    Ok(guard)
}

fn directive(value: &str) -> Result<tracing_subscriber::filter::Directive, AqiError> {
    value
        .parse()
        .map_err(|e| AqiError::ConfigError(format!("Invalid log directive {}: {}", value, e)))
}
