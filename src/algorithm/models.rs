use std::{fmt, num::NonZeroUsize, str::FromStr};

use gbdt::{
    config::Config as BoosterConfig,
    decision_tree::{Data as BoosterRow, DataVec, ValueType},
    gradient_boost::GBDT,
};
use linfa::{
    traits::{Fit, PredictInplace},
    DatasetBase,
};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix2};
use randomforest::{
    criterion::Mse,
    table::TableBuilder,
    RandomForestRegressor, RandomForestRegressorOptions,
};
use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, instrument};

use crate::{config::ForecastConfig, error::AqiError};

/// A trained regressor that maps one scaled feature row to an AQI value.
pub trait Predictor {
    fn name(&self) -> &str;

    fn n_features(&self) -> usize;

    fn predict_row(&self, row: ArrayView1<f64>) -> Result<f64, AqiError>;

    fn predict(&self, records: ArrayView2<f64>) -> Result<Array1<f64>, AqiError> {
        records
            .axis_iter(Axis(0))
            .map(|row| self.predict_row(row))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ForestSettings {
    #[serde(rename = "n-estimators", default = "default_forest_estimators")]
    pub n_estimators: usize,
    /// Features tried per split. `None` tries every feature.
    #[serde(rename = "max-features", default)]
    pub max_features: Option<usize>,
    /// Bootstrap rows drawn per tree. `None` draws as many rows as the training set has.
    #[serde(rename = "max-samples", default)]
    pub max_samples: Option<usize>,
}

fn default_forest_estimators() -> usize {
    200
}

fn default_min_leaf() -> usize {
    1
}

impl Default for ForestSettings {
    fn default() -> Self {
        Self {
            n_estimators: default_forest_estimators(),
            max_features: None,
            max_samples: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BoostingSettings {
    #[serde(rename = "n-estimators")]
    pub n_estimators: usize,
    #[serde(rename = "learning-rate")]
    pub learning_rate: f64,
    #[serde(rename = "max-depth")]
    pub max_depth: usize,
    #[serde(rename = "min-samples-leaf", default = "default_min_leaf")]
    pub min_samples_leaf: usize,
    /// Quantile bins per feature. `None` grows trees on the raw values.
    #[serde(rename = "max-bins", default)]
    pub max_bins: Option<usize>,
}

impl BoostingSettings {
    pub fn gradient() -> Self {
        Self {
            n_estimators: 200,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 1,
            max_bins: None,
        }
    }

    pub fn histogram() -> Self {
        Self {
            n_estimators: 200,
            learning_rate: 0.05,
            max_depth: 5,
            min_samples_leaf: 20,
            max_bins: Some(64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelKind {
    RandomForest,
    GradientBoosting,
    HistGradientBoosting,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::RandomForest,
        ModelKind::GradientBoosting,
        ModelKind::HistGradientBoosting,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::RandomForest => "RandomForest",
            ModelKind::GradientBoosting => "GradientBoosting",
            ModelKind::HistGradientBoosting => "HistGradientBoosting",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ModelKind {
    type Err = AqiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| AqiError::ModelNotFound(s.to_string()))
    }
}

/// Hyper-parameters for one named predictor, ready to be fitted.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelParams {
    RandomForest { settings: ForestSettings, seed: u64 },
    GradientBoosting(BoostingSettings),
    HistGradientBoosting(BoostingSettings),
}

impl ModelParams {
    pub fn from_config(kind: ModelKind, config: &ForecastConfig) -> Self {
        match kind {
            ModelKind::RandomForest => ModelParams::RandomForest {
                settings: config.random_forest.clone(),
                seed: config.seed,
            },
            ModelKind::GradientBoosting => {
                ModelParams::GradientBoosting(config.gradient_boosting.clone())
            }
            ModelKind::HistGradientBoosting => {
                ModelParams::HistGradientBoosting(config.hist_gradient_boosting.clone())
            }
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            ModelParams::RandomForest { .. } => ModelKind::RandomForest,
            ModelParams::GradientBoosting(_) => ModelKind::GradientBoosting,
            ModelParams::HistGradientBoosting(_) => ModelKind::HistGradientBoosting,
        }
    }
}

impl Fit<Array2<f64>, Array1<f64>, AqiError> for ModelParams {
    type Object = TrainedModel;

    #[instrument(skip_all, fields(model = %self.kind(), samples = dataset.records.nrows()))]
    fn fit(
        &self,
        dataset: &DatasetBase<Array2<f64>, Array1<f64>>,
    ) -> Result<TrainedModel, AqiError> {
        let records = dataset.records.view();
        let targets = dataset.targets.view();
        if records.nrows() == 0 {
            return Err(AqiError::InsufficientData {
                got: 0,
                required: 1,
                context: format!("No training rows for {}", self.kind()),
            });
        }
        let model = match self {
            ModelParams::RandomForest { settings, seed } => {
                TrainedModel::RandomForest(Forest::fit(settings, *seed, records, targets)?)
            }
            ModelParams::GradientBoosting(settings) => {
                TrainedModel::GradientBoosting(Booster::fit(settings, records, targets)?)
            }
            ModelParams::HistGradientBoosting(settings) => {
                TrainedModel::HistGradientBoosting(Booster::fit(settings, records, targets)?)
            }
        };
        debug!("Fitted {}", model.name());
        Ok(model)
    }
}

fn non_zero(value: usize, key: &str) -> Result<NonZeroUsize, AqiError> {
    NonZeroUsize::new(value)
        .ok_or_else(|| AqiError::ConfigError(format!("{} must be positive", key)))
}

/// Bagged regression trees with a fixed seed.
pub struct Forest {
    regressor: RandomForestRegressor,
    n_features: usize,
}

impl Forest {
    fn fit(
        settings: &ForestSettings,
        seed: u64,
        records: ArrayView2<f64>,
        targets: ArrayView1<f64>,
    ) -> Result<Self, AqiError> {
        let mut table_builder = TableBuilder::new();
        for (row, &target) in records.axis_iter(Axis(0)).zip(targets.iter()) {
            table_builder.add_row(&row.to_vec(), target)?;
        }
        let table = table_builder.build()?;
        let regressor = RandomForestRegressorOptions::new()
            .seed(seed)
            .trees(non_zero(settings.n_estimators, "n-estimators")?)
            .max_features(non_zero(
                settings.max_features.unwrap_or(records.ncols()),
                "max-features",
            )?)
            .max_samples(non_zero(
                settings.max_samples.unwrap_or(records.nrows()),
                "max-samples",
            )?)
            .fit(Mse, table);
        Ok(Self {
            regressor,
            n_features: records.ncols(),
        })
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.regressor.predict(&row.to_vec())
    }
}

impl fmt::Debug for Forest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forest")
            .field("n_features", &self.n_features)
            .finish_non_exhaustive()
    }
}

// The regressor has its own binary layout; it travels as an opaque byte blob.
impl Serialize for Forest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut bytes = Vec::new();
        self.regressor
            .serialize(&mut bytes)
            .map_err(<S::Error as ser::Error>::custom)?;
        (self.n_features, bytes).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Forest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (n_features, bytes) = <(usize, Vec<u8>)>::deserialize(deserializer)?;
        let regressor = RandomForestRegressor::deserialize(bytes.as_slice())
            .map_err(<D::Error as de::Error>::custom)?;
        Ok(Self {
            regressor,
            n_features,
        })
    }
}

/// Per-feature quantile thresholds mapping raw values to bin indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinMapper {
    thresholds: Vec<Vec<f64>>,
}

impl BinMapper {
    pub fn fit(records: ArrayView2<f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.max(2);
        let thresholds = records
            .axis_iter(Axis(1))
            .map(|column| {
                let mut values: Vec<f64> = column.to_vec();
                values.sort_by(|a, b| a.total_cmp(b));
                values.dedup();
                if values.len() <= max_bins {
                    return values.windows(2).map(|w| w[0] + (w[1] - w[0]) / 2.0).collect();
                }
                let mut cuts: Vec<f64> = (1..max_bins)
                    .map(|k| values[k * values.len() / max_bins])
                    .collect();
                cuts.dedup();
                cuts
            })
            .collect();
        Self { thresholds }
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.thresholds.get(feature).map_or(0, |t| t.len() + 1)
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        row.iter()
            .zip(&self.thresholds)
            .map(|(&v, cuts)| cuts.partition_point(|&t| t < v) as f64)
            .collect()
    }

    pub fn transform(&self, records: ArrayView2<f64>) -> Array2<f64> {
        let mut binned = Array2::zeros(records.raw_dim());
        for (mut out, row) in binned.axis_iter_mut(Axis(0)).zip(records.axis_iter(Axis(0))) {
            out.assign(&self.transform_row(row));
        }
        binned
    }
}

fn booster_features(row: ArrayView1<f64>) -> Vec<ValueType> {
    row.iter().map(|&v| v as ValueType).collect()
}

/// Least-squares gradient boosted trees, optionally grown on binned inputs.
#[derive(Serialize, Deserialize)]
pub struct Booster {
    model: GBDT,
    bins: Option<BinMapper>,
    n_features: usize,
}

impl Booster {
    fn fit(
        settings: &BoostingSettings,
        records: ArrayView2<f64>,
        targets: ArrayView1<f64>,
    ) -> Result<Self, AqiError> {
        if !(settings.learning_rate > 0.0 && settings.learning_rate <= 1.0) {
            return Err(AqiError::ConfigError(format!(
                "learning-rate must be in (0, 1], got {}",
                settings.learning_rate
            )));
        }
        if settings.max_depth == 0 || settings.n_estimators == 0 {
            return Err(AqiError::ConfigError(
                "max-depth and n-estimators must be positive".to_string(),
            ));
        }

        let mut config = BoosterConfig::new();
        config.set_feature_size(records.ncols());
        config.set_max_depth(settings.max_depth as u32);
        config.set_min_leaf_size(settings.min_samples_leaf.max(1));
        config.set_iterations(settings.n_estimators);
        config.set_shrinkage(settings.learning_rate as ValueType);
        config.set_loss("SquaredError");
        // Full rows and columns every stage keep training deterministic
        config.set_data_sample_ratio(1.0);
        config.set_feature_sample_ratio(1.0);
        config.set_training_optimization_level(2);
        config.set_debug(false);

        let bins = settings.max_bins.map(|b| BinMapper::fit(records, b));
        let binned = bins.as_ref().map(|b| b.transform(records));
        let inputs = match binned.as_ref() {
            Some(b) => b.view(),
            None => records.view(),
        };

        let mut training: DataVec = inputs
            .axis_iter(Axis(0))
            .zip(targets.iter())
            .map(|(row, &target)| {
                BoosterRow::new_training_data(booster_features(row), 1.0, target as ValueType, None)
            })
            .collect();
        let mut model = GBDT::new(&config);
        model.fit(&mut training);

        Ok(Self {
            model,
            bins,
            n_features: records.ncols(),
        })
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let features = match &self.bins {
            Some(bins) => booster_features(bins.transform_row(row).view()),
            None => booster_features(row.view()),
        };
        let rows: DataVec = vec![BoosterRow::new_test_data(features, None)];
        self.model
            .predict(&rows)
            .first()
            .map_or(f64::NAN, |&p| p as f64)
    }
}

impl fmt::Debug for Booster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Booster")
            .field("bins", &self.bins.is_some())
            .field("n_features", &self.n_features)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub enum TrainedModel {
    RandomForest(Forest),
    GradientBoosting(Booster),
    HistGradientBoosting(Booster),
}

impl TrainedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedModel::RandomForest(_) => ModelKind::RandomForest,
            TrainedModel::GradientBoosting(_) => ModelKind::GradientBoosting,
            TrainedModel::HistGradientBoosting(_) => ModelKind::HistGradientBoosting,
        }
    }

    fn predict_unchecked(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            TrainedModel::RandomForest(m) => m.predict_row(row),
            TrainedModel::GradientBoosting(m) | TrainedModel::HistGradientBoosting(m) => {
                m.predict_row(row)
            }
        }
    }
}

impl Predictor for TrainedModel {
    fn name(&self) -> &str {
        self.kind().name()
    }

    fn n_features(&self) -> usize {
        match self {
            TrainedModel::RandomForest(m) => m.n_features,
            TrainedModel::GradientBoosting(m) | TrainedModel::HistGradientBoosting(m) => {
                m.n_features
            }
        }
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> Result<f64, AqiError> {
        if row.len() != self.n_features() {
            return Err(AqiError::FeatureMismatch {
                expected: self.n_features(),
                got: row.len(),
            });
        }
        Ok(self.predict_unchecked(row))
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<f64>> for TrainedModel {
    fn predict_inplace(&self, records: &ArrayBase<D, Ix2>, targets: &mut Array1<f64>) {
        assert_eq!(
            records.nrows(),
            targets.len(),
            "The number of data points must match the number of output targets."
        );
        assert_eq!(
            records.ncols(),
            self.n_features(),
            "The number of features must match the trained model."
        );
        for (row, target) in records.axis_iter(Axis(0)).zip(targets.iter_mut()) {
            *target = self.predict_unchecked(row);
        }
    }

    fn default_target(&self, records: &ArrayBase<D, Ix2>) -> Array1<f64> {
        Array1::zeros(records.nrows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linfa::{traits::Predict, Dataset};
    use ndarray::array;

    fn toy_dataset() -> Dataset<f64, f64, ndarray::Ix1> {
        let x = Array2::from_shape_fn((120, 2), |(i, j)| {
            if j == 0 {
                i as f64 / 10.0
            } else {
                ((i * 7) % 11) as f64
            }
        });
        let y = x.column(0).mapv(|v| if v < 6.0 { 10.0 } else { 40.0 + v });
        Dataset::new(x, y)
    }

    fn small_forest(seed: u64) -> ModelParams {
        ModelParams::RandomForest {
            settings: ForestSettings {
                n_estimators: 15,
                ..ForestSettings::default()
            },
            seed,
        }
    }

    #[test]
    fn test_model_kind_names_round_trip() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.name().parse::<ModelKind>().unwrap(), kind);
        }
        assert!(matches!(
            "Linear".parse::<ModelKind>(),
            Err(AqiError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_forest_is_deterministic_for_seed() {
        let dataset = toy_dataset();
        let a = small_forest(42).fit(&dataset).unwrap();
        let b = small_forest(42).fit(&dataset).unwrap();
        for row in [array![3.0, 4.0], array![7.5, 1.0], array![11.0, 9.0]] {
            assert_eq!(
                a.predict_row(row.view()).unwrap(),
                b.predict_row(row.view()).unwrap()
            );
        }
    }

    #[test]
    fn test_every_model_learns_the_step() {
        let dataset = toy_dataset();
        let params = [
            small_forest(7),
            ModelParams::GradientBoosting(BoostingSettings {
                n_estimators: 60,
                ..BoostingSettings::gradient()
            }),
            ModelParams::HistGradientBoosting(BoostingSettings {
                n_estimators: 120,
                min_samples_leaf: 5,
                ..BoostingSettings::histogram()
            }),
        ];
        for p in params {
            let model = p.fit(&dataset).unwrap();
            let low = model.predict_row(array![2.0, 1.0].view()).unwrap();
            let high = model.predict_row(array![10.0, 1.0].view()).unwrap();
            assert!((low - 10.0).abs() < 3.0, "{}: {}", model.name(), low);
            assert!((high - 50.0).abs() < 5.0, "{}: {}", model.name(), high);
        }
    }

    #[test]
    fn test_linfa_predict_matches_predictor() {
        let dataset = toy_dataset();
        let model = ModelParams::GradientBoosting(BoostingSettings {
            n_estimators: 20,
            ..BoostingSettings::gradient()
        })
        .fit(&dataset)
        .unwrap();
        let via_linfa: Array1<f64> = Predict::predict(&model, &dataset.records);
        let direct = Predictor::predict(&model, dataset.records.view()).unwrap();
        assert_eq!(via_linfa, direct);
    }

    #[test]
    fn test_predict_row_rejects_wrong_width() {
        let model = small_forest(1).fit(&toy_dataset()).unwrap();
        let result = model.predict_row(array![1.0, 2.0, 3.0].view());
        assert!(matches!(
            result,
            Err(AqiError::FeatureMismatch {
                expected: 2,
                got: 3
            })
        ));
    }

    #[test]
    #[should_panic(expected = "The number of features must match the trained model.")]
    fn test_linfa_predict_panics_on_wrong_width() {
        let model = small_forest(1).fit(&toy_dataset()).unwrap();
        let records = Array2::<f64>::zeros((4, 3));
        let _: Array1<f64> = Predict::predict(&model, &records);
    }

    #[test]
    fn test_models_survive_bincode() {
        let dataset = toy_dataset();
        let row = array![4.2, 3.0];
        for p in [
            small_forest(3),
            ModelParams::HistGradientBoosting(BoostingSettings {
                n_estimators: 10,
                min_samples_leaf: 5,
                ..BoostingSettings::histogram()
            }),
        ] {
            let model = p.fit(&dataset).unwrap();
            let bytes =
                bincode::serde::encode_to_vec(&model, bincode::config::standard()).unwrap();
            let (loaded, _): (TrainedModel, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
            assert_eq!(loaded.kind(), model.kind());
            assert_eq!(loaded.n_features(), 2);
            assert_eq!(
                loaded.predict_row(row.view()).unwrap(),
                model.predict_row(row.view()).unwrap()
            );
        }
    }

    #[test]
    fn test_bin_mapper_caps_bins() {
        let x = Array2::from_shape_fn((500, 1), |(i, _)| i as f64);
        let bins = BinMapper::fit(x.view(), 16);
        assert!(bins.n_bins(0) <= 16);
        let binned = bins.transform(x.view());
        assert_eq!(binned[[0, 0]], 0.0);
        assert_eq!(binned[[499, 0]], (bins.n_bins(0) - 1) as f64);
        // Monotone in the raw value
        assert!(binned
            .column(0)
            .windows(2)
            .into_iter()
            .all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_rejects_bad_settings() {
        let result = ModelParams::GradientBoosting(BoostingSettings {
            learning_rate: 0.0,
            ..BoostingSettings::gradient()
        })
        .fit(&toy_dataset());
        assert!(matches!(result, Err(AqiError::ConfigError(_))));

        let result = ModelParams::RandomForest {
            settings: ForestSettings {
                n_estimators: 0,
                ..ForestSettings::default()
            },
            seed: 1,
        }
        .fit(&toy_dataset());
        assert!(matches!(result, Err(AqiError::ConfigError(_))));
    }
}
