use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use tracing::subscriber::set_default;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;

use crate::data::reading::Reading;

pub struct TracingGuards {
    _subscriber_guard: tracing::subscriber::DefaultGuard,
    _worker_guard: WorkerGuard,
}

pub fn setup_test_tracing(test_name: &str) -> TracingGuards {
    // Per-test log files live next to the integration tests
    let log_dir = Path::new("tests/logs");
    if !log_dir.exists() {
        let _ = std::fs::create_dir_all(log_dir);
    }

    // File appender with a non-blocking writer
    let file_appender = tracing_appender::rolling::never(log_dir, format!("{}.log", test_name));
    let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);

    // DEBUG and above, with thread info for the parallel training logs
    let subscriber = fmt::Subscriber::builder()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    // Default subscriber for this thread only
    let subscriber_guard = set_default(subscriber);

    // Both guards must outlive the test body
    TracingGuards {
        _subscriber_guard: subscriber_guard,
        _worker_guard: worker_guard,
    }
}

/// `n` consecutive hourly readings from 2025-06-01T00:00Z with `pm2_5 = f(i)`
/// and fixed gas concentrations, already normalized.
pub fn hourly_readings(n: usize, f: impl Fn(usize) -> f64) -> Vec<Reading> {
    // 2025-06-01T00:00:00Z
    let start = DateTime::<Utc>::from_timestamp(1_748_736_000, 0).unwrap_or_default();
    (0..n)
        .map(|i| {
            // Only pm2_5 varies between rows
            let mut reading = Reading {
                timestamp: start + Duration::hours(i as i64),
                aqi: None,
                co: Some(300.0),
                no: Some(0.5),
                no2: Some(4.0),
                o3: Some(60.0),
                so2: Some(3.0),
                pm2_5: Some(f(i)),
                pm10: Some(20.0),
                nh3: Some(1.5),
            };
            reading.normalize();
            reading
        })
        .collect()
}
