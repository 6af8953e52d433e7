use std::{fs::File, path::Path};

use chrono::{DateTime, NaiveDateTime, Utc};
use ndarray::Array1;
use tracing::{debug, info, instrument};

use crate::{
    algorithm::{models::Predictor, preprocess::StandardScaler},
    data::{features::FeatureVector, store::ensure_parent},
    error::AqiError,
    forecast::state::FeatureState,
    util::math_utils::round_to,
};

/// Timestamp layout of the forecast and history files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub aqi: f64,
}

/// The most recent row whose model inputs are all defined.
pub fn last_known_row(features: &[FeatureVector]) -> Result<&FeatureVector, AqiError> {
    features
        .iter()
        .rev()
        .find(|f| f.inputs().is_some())
        .ok_or(AqiError::InsufficientData {
            got: features.len(),
            required: 1,
            context: "No feature row with every model input defined".to_string(),
        })
}

fn predict_state<P: Predictor + ?Sized>(
    predictor: &P,
    scaler: &StandardScaler,
    state: &FeatureState,
) -> Result<f64, AqiError> {
    let raw = Array1::from(state.inputs().to_vec());
    let scaled = scaler.transform_row(raw.view())?;
    let prediction = predictor.predict_row(scaled.view())?;
    if !prediction.is_finite() {
        return Err(AqiError::NonFiniteData {
            context: format!("{} prediction at {}", predictor.name(), state.timestamp),
        });
    }
    Ok(prediction)
}

/**
Run the autoregressive recurrence for `horizon` hours past the last known row.

Step 0 predicts from `last` unchanged. Every later step advances the feature state with
the previous raw prediction and predicts again. Inputs are scaled with the training
scaler each step.

## Returns
Exactly `horizon + 1` points, values rounded to two decimals.
 */
#[instrument(skip_all, fields(model = predictor.name(), horizon = horizon))]
pub fn forecast<P: Predictor + ?Sized>(
    predictor: &P,
    scaler: &StandardScaler,
    last: &FeatureState,
    horizon: usize,
) -> Result<Vec<ForecastPoint>, AqiError> {
    let mut points = Vec::with_capacity(horizon + 1);
    let mut state = *last;
    let mut prediction = predict_state(predictor, scaler, &state)?;
    points.push(ForecastPoint {
        timestamp: state.timestamp,
        aqi: round_to(prediction, 2),
    });
    for _ in 0..horizon {
        state = state.advance(prediction);
        prediction = predict_state(predictor, scaler, &state)?;
        points.push(ForecastPoint {
            timestamp: state.timestamp,
            aqi: round_to(prediction, 2),
        });
    }
    debug!("Forecast from {} to {}", last.timestamp, state.timestamp);
    Ok(points)
}

/// Forecasts of several predictors over the same timestamps, one column each.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForecastTable {
    pub timestamps: Vec<DateTime<Utc>>,
    pub columns: Vec<(String, Vec<f64>)>,
}

impl ForecastTable {
    pub fn add_column(&mut self, name: &str, points: &[ForecastPoint]) -> Result<(), AqiError> {
        let timestamps: Vec<DateTime<Utc>> = points.iter().map(|p| p.timestamp).collect();
        if self.columns.is_empty() {
            self.timestamps = timestamps;
        } else if self.timestamps != timestamps {
            return Err(AqiError::FeatureMismatch {
                expected: self.timestamps.len(),
                got: timestamps.len(),
            });
        }
        self.columns
            .push((name.to_string(), points.iter().map(|p| p.aqi).collect()));
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), AqiError> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let mut writer = csv::Writer::from_writer(File::create(path)?);
        let mut header = vec!["timestamp"];
        header.extend(self.names());
        writer.write_record(&header)?;
        for (i, ts) in self.timestamps.iter().enumerate() {
            let mut record = vec![ts.format(TIMESTAMP_FORMAT).to_string()];
            record.extend(self.columns.iter().map(|(_, values)| values[i].to_string()));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        info!(
            "Wrote {} forecast rows for {} models to {}",
            self.len(),
            self.columns.len(),
            path.display()
        );
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, AqiError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        if headers.get(0) != Some("timestamp") {
            return Err(AqiError::InvalidHistory(
                "forecast file must start with a timestamp column".to_string(),
            ));
        }
        let mut table = ForecastTable {
            timestamps: Vec::new(),
            columns: headers
                .iter()
                .skip(1)
                .map(|name| (name.to_string(), Vec::new()))
                .collect(),
        };
        for record in reader.records() {
            let record = record?;
            table.timestamps.push(parse_timestamp(&record[0])?);
            for (j, (_, values)) in table.columns.iter_mut().enumerate() {
                let cell = record.get(j + 1).unwrap_or_default();
                let value = cell.parse::<f64>().map_err(|e| {
                    AqiError::InvalidHistory(format!("bad forecast value {:?}: {}", cell, e))
                })?;
                values.push(value);
            }
        }
        Ok(table)
    }
}

pub(crate) fn parse_timestamp(cell: &str) -> Result<DateTime<Utc>, AqiError> {
    let naive = NaiveDateTime::parse_from_str(cell, TIMESTAMP_FORMAT)?;
    Ok(naive.and_utc())
}
