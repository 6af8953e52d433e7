use std::{fs::File, path::Path};

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use ta::{indicators::SimpleMovingAverage, Next, Reset};
use tracing::{debug, info, instrument};

use crate::{
    data::{reading::Reading, store::ensure_parent},
    error::AqiError,
    util::math_utils::sample_std_deviation,
};

pub const LAG_SHORT: usize = 1;
pub const LAG_MEDIUM: usize = 2;
pub const LAG_DAY: usize = 24;
pub const MEAN_WINDOW: usize = 6;
pub const STD_WINDOW: usize = 12;

/// Model inputs in the column order used by the scaler and every predictor:
/// the raw concentrations followed by the derived fields.
pub const FEATURE_NAMES: [&str; 22] = [
    "co",
    "no",
    "no2",
    "o3",
    "so2",
    "pm2_5",
    "pm10",
    "nh3",
    "hour",
    "day",
    "month",
    "weekday",
    "is_weekend",
    "lag_1",
    "lag_2",
    "lag_24",
    "rolling_mean_6h",
    "rolling_std_12h",
    "aqi_diff",
    "aqi_pct_change",
    "pm_ratio",
    "gas_ratio",
];

pub const N_FEATURES: usize = FEATURE_NAMES.len();

/// A reading plus everything derived from its trailing history.
///
/// Only rows whose lags and rolling windows are fully defined exist. The
/// concentrations, the percent change and the two ratios may still be undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub timestamp: DateTime<Utc>,
    pub aqi: u32,
    pub co: Option<f64>,
    pub no: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub nh3: Option<f64>,
    pub hour: u32,
    pub day: u32,
    pub month: u32,
    pub weekday: u32,
    pub is_weekend: u32,
    pub lag_1: f64,
    pub lag_2: f64,
    pub lag_24: f64,
    pub rolling_mean_6h: f64,
    pub rolling_std_12h: f64,
    pub aqi_diff: f64,
    pub aqi_pct_change: Option<f64>,
    pub pm_ratio: Option<f64>,
    pub gas_ratio: Option<f64>,
}

impl FeatureVector {
    /// Model inputs in [`FEATURE_NAMES`] order, or `None` if any is undefined or non-finite.
    pub fn inputs(&self) -> Option<[f64; N_FEATURES]> {
        let values = [
            self.co?,
            self.no?,
            self.no2?,
            self.o3?,
            self.so2?,
            self.pm2_5?,
            self.pm10?,
            self.nh3?,
            self.hour as f64,
            self.day as f64,
            self.month as f64,
            self.weekday as f64,
            self.is_weekend as f64,
            self.lag_1,
            self.lag_2,
            self.lag_24,
            self.rolling_mean_6h,
            self.rolling_std_12h,
            self.aqi_diff,
            self.aqi_pct_change?,
            self.pm_ratio?,
            self.gas_ratio?,
        ];
        values.iter().all(|v| v.is_finite()).then_some(values)
    }

    pub fn target(&self) -> f64 {
        self.aqi as f64
    }
}

/// Divides, treating an absent or zero denominator as undefined.
fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d),
        _ => None,
    }
}

fn sum3(a: Option<f64>, b: Option<f64>, c: Option<f64>) -> Option<f64> {
    Some(a? + b? + c?)
}

/**
Derive feature vectors from readings sorted strictly ascending by timestamp.

Lags and windows count positions, not wall-clock hours: a missing hour is simply
absent. Row `i` is emitted only if `i >= 24` and its own AQI, its lag AQIs and every
AQI in both trailing windows are defined.

## Errors
`UnorderedReadings` if timestamps are not strictly increasing.
 */
#[instrument(skip(readings), fields(readings = readings.len()))]
pub fn derive_features(readings: &[Reading]) -> Result<Vec<FeatureVector>, AqiError> {
    if let Some(index) = readings
        .windows(2)
        .position(|pair| pair[0].timestamp >= pair[1].timestamp)
    {
        return Err(AqiError::UnorderedReadings { index: index + 1 });
    }

    let aqi: Vec<Option<f64>> = readings.iter().map(|r| r.aqi.map(f64::from)).collect();

    let mut sma = SimpleMovingAverage::new(MEAN_WINDOW)
        .map_err(|e| AqiError::ConfigError(format!("Invalid rolling window: {:?}", e)))?;
    // Consecutive defined AQI values ending at the current row.
    let mut run = 0usize;

    let mut features = Vec::new();
    for (i, reading) in readings.iter().enumerate() {
        let rolling_mean = match aqi[i] {
            Some(value) => {
                run += 1;
                let mean = sma.next(value);
                (run >= MEAN_WINDOW).then_some(mean)
            }
            None => {
                run = 0;
                sma.reset();
                None
            }
        };

        if i < LAG_DAY {
            continue;
        }
        let (Some(current), Some(lag_1), Some(lag_2), Some(lag_24), Some(rolling_mean_6h)) = (
            aqi[i],
            aqi[i - LAG_SHORT],
            aqi[i - LAG_MEDIUM],
            aqi[i - LAG_DAY],
            rolling_mean,
        ) else {
            continue;
        };
        let Some(std_window) = aqi[i + 1 - STD_WINDOW..=i]
            .iter()
            .copied()
            .collect::<Option<Vec<f64>>>()
        else {
            continue;
        };
        let Some(rolling_std_12h) = sample_std_deviation(&std_window) else {
            continue;
        };

        let aqi_diff = current - lag_1;
        let ts = reading.timestamp;
        let weekday = ts.weekday();
        features.push(FeatureVector {
            timestamp: ts,
            aqi: reading.aqi.unwrap_or_default(),
            co: reading.co,
            no: reading.no,
            no2: reading.no2,
            o3: reading.o3,
            so2: reading.so2,
            pm2_5: reading.pm2_5,
            pm10: reading.pm10,
            nh3: reading.nh3,
            hour: ts.hour(),
            day: ts.day(),
            month: ts.month(),
            weekday: weekday.num_days_from_monday(),
            is_weekend: u32::from(matches!(weekday, Weekday::Sat | Weekday::Sun)),
            lag_1,
            lag_2,
            lag_24,
            rolling_mean_6h,
            rolling_std_12h,
            aqi_diff,
            aqi_pct_change: ratio(Some(aqi_diff), Some(lag_1)).map(|r| r * 100.0),
            pm_ratio: ratio(reading.pm2_5, reading.pm10),
            gas_ratio: ratio(sum3(reading.no2, reading.so2, reading.o3), reading.co),
        });
    }

    debug!(
        "Derived {} feature rows from {} readings",
        features.len(),
        readings.len()
    );
    Ok(features)
}

pub fn write_features<P: AsRef<Path>>(path: P, features: &[FeatureVector]) -> Result<(), AqiError> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    for feature in features {
        writer.serialize(feature)?;
    }
    writer.flush()?;
    info!("Wrote {} feature rows to {}", features.len(), path.display());
    Ok(())
}

pub fn read_features<P: AsRef<Path>>(path: P) -> Result<Vec<FeatureVector>, AqiError> {
    let mut reader = csv::Reader::from_path(path)?;
    let features = reader
        .deserialize()
        .collect::<Result<Vec<FeatureVector>, csv::Error>>()?;
    Ok(features)
}
