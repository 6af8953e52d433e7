use std::{fmt, fs::File, path::Path};

use linfa::prelude::SingleTargetRegression as _;
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{algorithm::models::Predictor, data::store::ensure_parent, error::AqiError};

/// Hold-out error of one predictor on the test partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl EvaluationMetrics {
    pub fn compute(
        predictions: ArrayView1<f64>,
        truth: ArrayView1<f64>,
    ) -> Result<Self, AqiError> {
        if predictions.len() != truth.len() || truth.is_empty() {
            return Err(AqiError::InsufficientData {
                got: predictions.len(),
                required: truth.len().max(1),
                context: "Predictions must cover every test target".to_string(),
            });
        }
        let mse = predictions.mean_squared_error(&truth)?;
        Ok(Self {
            rmse: mse.sqrt(),
            mae: predictions.mean_absolute_error(&truth)?,
            r2: predictions.r2(&truth)?,
        })
    }

    pub fn evaluate<P: Predictor + ?Sized>(
        predictor: &P,
        records: ArrayView2<f64>,
        truth: ArrayView1<f64>,
    ) -> Result<Self, AqiError> {
        let predictions = predictor.predict(records)?;
        Self::compute(predictions.view(), truth)
    }
}

impl fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RMSE: {:.3}, MAE: {:.3}, R2: {:.3}",
            self.rmse, self.mae, self.r2
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub model: String,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

pub fn write_results<P: AsRef<Path>>(path: P, rows: &[MetricsRow]) -> Result<(), AqiError> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("Wrote evaluation of {} models to {}", rows.len(), path.display());
    Ok(())
}

pub fn read_results<P: AsRef<Path>>(path: P) -> Result<Vec<MetricsRow>, AqiError> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<MetricsRow>, csv::Error>>()?;
    Ok(rows)
}
