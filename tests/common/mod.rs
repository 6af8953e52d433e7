#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration as StdDuration,
};

use aqi_forecast::{
    algorithm::models::{BoostingSettings, ForestSettings},
    config::ForecastConfig,
    data::{
        provider::AirQualityProvider,
        reading::{Components, ProviderMain, ProviderRecord},
    },
    error::AqiError,
    util::date_utils::FetchWindow,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
}

/// A config rooted at `dir` with models small enough for tests.
pub fn test_config(dir: &Path) -> ForecastConfig {
    ForecastConfig {
        data_dir: dir.to_path_buf(),
        start_date: "2025-06-01".to_string(),
        window_days: 5,
        request_timeout_secs: 1,
        random_forest: ForestSettings {
            n_estimators: 10,
            ..ForestSettings::default()
        },
        gradient_boosting: BoostingSettings {
            n_estimators: 30,
            ..BoostingSettings::gradient()
        },
        hist_gradient_boosting: BoostingSettings {
            n_estimators: 30,
            ..BoostingSettings::histogram()
        },
        ..Default::default()
    }
}

pub fn record(dt: i64) -> ProviderRecord {
    let hour = (dt / 3600) % 24;
    let pm2_5 = 12.0 + 10.0 * (hour as f64 * std::f64::consts::PI / 24.0).sin();
    ProviderRecord {
        dt,
        main: ProviderMain { aqi: Some(2) },
        components: Components {
            co: Some(300.0 + hour as f64),
            no: Some(0.4),
            no2: Some(4.0),
            o3: Some(55.0 + hour as f64),
            so2: Some(3.0),
            pm2_5: Some((pm2_5 * 10.0).round() / 10.0),
            pm10: Some(30.0),
            nh3: Some(1.2),
        },
    }
}

/// Serves hourly records for every requested window, running one hour past the
/// window end like a provider with a skewed clock. It fails on the configured call,
/// or answers that call with one record stamped outside the representable range.
pub struct ScriptedProvider {
    fail_on_call: Option<usize>,
    corrupt_on_call: Option<usize>,
    calls: AtomicUsize,
    requested: Mutex<Vec<FetchWindow>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            fail_on_call: None,
            corrupt_on_call: None,
            calls: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::new()
        }
    }

    pub fn corrupting_on(call: usize) -> Self {
        Self {
            corrupt_on_call: Some(call),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<FetchWindow> {
        self.requested.lock().unwrap().clone()
    }
}

impl AirQualityProvider for ScriptedProvider {
    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<ProviderRecord>, AqiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requested.lock().unwrap().push(*window);
        if self.fail_on_call == Some(call) {
            return Err(AqiError::ProviderError {
                window: window.to_string(),
                reason: "HTTP 429: Too Many Requests".to_string(),
            });
        }
        let mut records: Vec<ProviderRecord> = (window.start_epoch()..=window.end_epoch() + 3600)
            .step_by(3600)
            .map(record)
            .collect();
        if self.corrupt_on_call == Some(call) {
            records.push(record(i64::MAX));
        }
        Ok(records)
    }
}

/// Never answers within any reasonable timeout.
pub struct StalledProvider;

impl AirQualityProvider for StalledProvider {
    async fn fetch(&self, _window: &FetchWindow) -> Result<Vec<ProviderRecord>, AqiError> {
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

pub fn until_days(days: i64) -> DateTime<Utc> {
    start() + Duration::days(days)
}
