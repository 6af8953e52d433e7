use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use linfa::Dataset;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Ix1};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    data::{
        features::{FeatureVector, FEATURE_NAMES, N_FEATURES},
        store::ensure_parent,
    },
    error::AqiError,
};

/// Per-feature standardization fitted on the training prefix only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Array1<f64>,
    scales: Array1<f64>,
}

impl StandardScaler {
    /// Fits mean and population standard deviation per column.
    /// Constant columns get a scale of 1 so they map to zero instead of NaN.
    pub fn fit(records: ArrayView2<f64>) -> Result<Self, AqiError> {
        let means = records.mean_axis(Axis(0)).ok_or(AqiError::InsufficientData {
            got: 0,
            required: 1,
            context: "Cannot fit scaler on an empty matrix".to_string(),
        })?;
        let scales = records
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Ok(Self { means, scales })
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    pub fn transform(&self, records: ArrayView2<f64>) -> Result<Array2<f64>, AqiError> {
        if records.ncols() != self.n_features() {
            return Err(AqiError::FeatureMismatch {
                expected: self.n_features(),
                got: records.ncols(),
            });
        }
        Ok((&records - &self.means) / &self.scales)
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Result<Array1<f64>, AqiError> {
        if row.len() != self.n_features() {
            return Err(AqiError::FeatureMismatch {
                expected: self.n_features(),
                got: row.len(),
            });
        }
        Ok((&row - &self.means) / &self.scales)
    }
}

/// Chronological train/test partition, already scaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedSplit {
    pub train_records: Array2<f64>,
    pub train_targets: Array1<f64>,
    pub test_records: Array2<f64>,
    pub test_targets: Array1<f64>,
    pub scaler: StandardScaler,
}

impl PreparedSplit {
    pub fn train(&self) -> Dataset<f64, f64, Ix1> {
        Dataset::new(self.train_records.clone(), self.train_targets.clone())
            .with_feature_names(FEATURE_NAMES.to_vec())
    }

    pub fn test(&self) -> Dataset<f64, f64, Ix1> {
        Dataset::new(self.test_records.clone(), self.test_targets.clone())
            .with_feature_names(FEATURE_NAMES.to_vec())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), AqiError> {
        save_artifact(path, self)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AqiError> {
        load_artifact(path)
    }
}

/// Rows with every model input and the target defined and finite.
pub fn clean(features: &[FeatureVector]) -> Vec<([f64; N_FEATURES], f64)> {
    features
        .iter()
        .filter_map(|f| {
            let inputs = f.inputs()?;
            let target = f.target();
            target.is_finite().then_some((inputs, target))
        })
        .collect()
}

fn ensure_finite(records: ArrayView2<f64>, context: &str) -> Result<(), AqiError> {
    if records.iter().any(|x| !x.is_finite()) {
        return Err(AqiError::NonFiniteData {
            context: context.to_string(),
        });
    }
    Ok(())
}

/**
Clean, split chronologically and standardize a feature set.

The first `floor(len * train_ratio)` cleaned rows train; the rest test. No shuffling.
The scaler sees only the training rows.

## Errors
* `InsufficientData` if either partition would be empty.
* `NonFiniteData` if anything non-finite survives cleaning. This is fatal by design of the stage.
 */
#[instrument(skip(features), fields(rows = features.len()))]
pub fn prepare(features: &[FeatureVector], train_ratio: f64) -> Result<PreparedSplit, AqiError> {
    let rows = clean(features);
    let dropped = features.len() - rows.len();
    if dropped > 0 {
        warn!("Dropped {} rows with undefined or non-finite values", dropped);
    }

    let split_idx = (rows.len() as f64 * train_ratio) as usize;
    if split_idx == 0 || split_idx >= rows.len() {
        return Err(AqiError::InsufficientData {
            got: rows.len(),
            required: 2,
            context: format!(
                "Split index {} leaves an empty partition of {} cleaned rows",
                split_idx,
                rows.len()
            ),
        });
    }

    let flat: Vec<f64> = rows.iter().flat_map(|(inputs, _)| inputs.iter().copied()).collect();
    let records = Array2::from_shape_vec((rows.len(), N_FEATURES), flat)?;
    let targets: Array1<f64> = rows.iter().map(|(_, t)| *t).collect();
    ensure_finite(records.view(), "feature matrix after cleaning")?;
    if targets.iter().any(|t| !t.is_finite()) {
        return Err(AqiError::NonFiniteData {
            context: "target column after cleaning".to_string(),
        });
    }

    let (train_raw, test_raw) = records.view().split_at(Axis(0), split_idx);
    let scaler = StandardScaler::fit(train_raw)?;
    let train_records = scaler.transform(train_raw)?;
    let test_records = scaler.transform(test_raw)?;
    ensure_finite(train_records.view(), "scaled training matrix")?;
    ensure_finite(test_records.view(), "scaled test matrix")?;

    let train_targets = targets.slice(ndarray::s![..split_idx]).to_owned();
    let test_targets = targets.slice(ndarray::s![split_idx..]).to_owned();

    info!(
        "Train size: {}, Test size: {}",
        train_targets.len(),
        test_targets.len()
    );
    debug!("Scaler means: {:?}", scaler.means);

    Ok(PreparedSplit {
        train_records,
        train_targets,
        test_records,
        test_targets,
        scaler,
    })
}

pub(crate) fn save_artifact<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<(), AqiError> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serde::encode_into_std_write(value, &mut writer, bincode::config::standard())?;
    debug!("Saved artifact to {}", path.display());
    Ok(())
}

pub(crate) fn load_artifact<P: AsRef<Path>, T: serde::de::DeserializeOwned>(
    path: P,
) -> Result<T, AqiError> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    let value = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;
    Ok(value)
}
