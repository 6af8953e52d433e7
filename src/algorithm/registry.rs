use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use linfa::traits::Fit as _;
use rayon::prelude::*;
use tracing::{info, instrument, warn};

use crate::{
    algorithm::{
        metrics::{EvaluationMetrics, MetricsRow},
        models::{ModelKind, ModelParams, TrainedModel},
        preprocess::{load_artifact, save_artifact, PreparedSplit},
    },
    config::ForecastConfig,
    error::AqiError,
};

#[derive(Debug)]
pub struct RegisteredPredictor {
    pub model: TrainedModel,
    pub metrics: EvaluationMetrics,
}

/// Every named predictor trained on one split, with its hold-out metrics.
#[derive(Debug, Default)]
pub struct PredictorRegistry {
    entries: BTreeMap<ModelKind, RegisteredPredictor>,
}

impl PredictorRegistry {
    /**
    Train the fixed predictor set on the training partition and score each on the test partition.

    Predictors are independent of each other and train in parallel. Each is deterministic
    for the configured seed.

    ## Arguments
    * `split` - The scaled chronological split.
    * `config` - Supplies hyper-parameters and the seed.
     */
    #[instrument(skip_all, fields(train = split.train_targets.len(), test = split.test_targets.len()))]
    pub fn train_all(split: &PreparedSplit, config: &ForecastConfig) -> Result<Self, AqiError> {
        let train = split.train();
        let entries = ModelKind::ALL
            .par_iter()
            .map(|&kind| {
                info!("Training {}", kind);
                let model = ModelParams::from_config(kind, config).fit(&train)?;
                let metrics = EvaluationMetrics::evaluate(
                    &model,
                    split.test_records.view(),
                    split.test_targets.view(),
                )?;
                info!("{} - {}", kind, metrics);
                Ok((kind, RegisteredPredictor { model, metrics }))
            })
            .collect::<Result<BTreeMap<_, _>, AqiError>>()?;
        Ok(Self { entries })
    }

    pub fn get(&self, kind: ModelKind) -> Option<&RegisteredPredictor> {
        self.entries.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModelKind, &RegisteredPredictor)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The predictor with the smallest test RMSE. Informational only.
    pub fn lowest_rmse(&self) -> Option<(ModelKind, &EvaluationMetrics)> {
        self.entries
            .iter()
            .min_by(|a, b| a.1.metrics.rmse.total_cmp(&b.1.metrics.rmse))
            .map(|(kind, entry)| (*kind, &entry.metrics))
    }

    pub fn metrics_rows(&self) -> Vec<MetricsRow> {
        self.entries
            .iter()
            .map(|(kind, entry)| MetricsRow {
                model: kind.name().to_string(),
                rmse: entry.metrics.rmse,
                mae: entry.metrics.mae,
                r2: entry.metrics.r2,
            })
            .collect()
    }

    /// Writes each model to `<dir>/<name>.bin`.
    pub fn save_models<P: AsRef<Path>>(&self, dir: P) -> Result<(), AqiError> {
        for (kind, entry) in &self.entries {
            save_artifact(model_path(dir.as_ref(), *kind), &entry.model)?;
        }
        info!(
            "Saved {} models to {}",
            self.entries.len(),
            dir.as_ref().display()
        );
        Ok(())
    }
}

pub fn model_path(dir: &Path, kind: ModelKind) -> PathBuf {
    dir.join(format!("{}.bin", kind.name()))
}

pub fn load_model<P: AsRef<Path>>(dir: P, kind: ModelKind) -> Result<TrainedModel, AqiError> {
    let path = model_path(dir.as_ref(), kind);
    if !path.exists() {
        return Err(AqiError::ModelNotFound(kind.name().to_string()));
    }
    load_artifact(path)
}

/// Loads every persisted predictor in name order, skipping missing ones.
pub fn load_models<P: AsRef<Path>>(dir: P) -> Result<Vec<TrainedModel>, AqiError> {
    let mut models = Vec::new();
    for kind in ModelKind::ALL {
        match load_model(dir.as_ref(), kind) {
            Ok(model) => models.push(model),
            Err(AqiError::ModelNotFound(name)) => warn!("No persisted model for {}", name),
            Err(e) => return Err(e),
        }
    }
    if models.is_empty() {
        return Err(AqiError::ModelNotFound(format!(
            "any model in {}",
            dir.as_ref().display()
        )));
    }
    Ok(models)
}
