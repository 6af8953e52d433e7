//! One entry point per batch stage. Each stage reads the artifacts of the
//! previous one from `data-dir` and persists its own output wholesale.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use tracing::{info, instrument, warn};

use crate::{
    algorithm::{
        metrics::write_results,
        models::Predictor as _,
        preprocess::{load_artifact, prepare, save_artifact, PreparedSplit, StandardScaler},
        registry::{load_models, PredictorRegistry},
    },
    config::ForecastConfig,
    data::{
        features::{derive_features, read_features, write_features},
        ingest::{IngestReport, Ingestor},
        provider::{AirQualityProvider, OpenWeatherClient},
        store::ReadingStore,
    },
    error::AqiError,
    forecast::{
        forecaster::{forecast as run_forecast, last_known_row, ForecastTable},
        history::{reconcile, ForecastHistory},
        state::FeatureState,
    },
};

/// Fetches everything from the configured start date up to now.
pub async fn ingest(config: &ForecastConfig) -> Result<IngestReport, AqiError> {
    let provider = OpenWeatherClient::new(config)?;
    ingest_with(config, &provider, Utc::now()).await
}

#[instrument(skip_all, fields(until = %until))]
pub async fn ingest_with<P: AirQualityProvider>(
    config: &ForecastConfig,
    provider: &P,
    until: DateTime<Utc>,
) -> Result<IngestReport, AqiError> {
    let store = ReadingStore::new(config.readings_path());
    let ingestor = Ingestor::new(
        provider,
        &store,
        Duration::days(config.window_days),
        StdDuration::from_secs(config.request_timeout_secs),
    );
    ingestor.ingest(config.start_datetime()?, until).await
}

#[instrument(skip_all)]
pub fn features(config: &ForecastConfig) -> Result<usize, AqiError> {
    let readings = ReadingStore::new(config.readings_path()).load_sorted()?;
    let features = derive_features(&readings)?;
    write_features(config.features_path(), &features)?;
    Ok(features.len())
}

#[instrument(skip_all)]
pub fn preprocess(config: &ForecastConfig) -> Result<PreparedSplit, AqiError> {
    let features = read_features(config.features_path())?;
    let split = prepare(&features, config.train_ratio)?;
    split.save(config.split_path())?;
    save_artifact(config.scaler_path(), &split.scaler)?;
    Ok(split)
}

#[instrument(skip_all)]
pub fn train(config: &ForecastConfig) -> Result<PredictorRegistry, AqiError> {
    let split = PreparedSplit::load(config.split_path())?;
    let registry = PredictorRegistry::train_all(&split, config)?;
    registry.save_models(config.models_dir())?;
    write_results(config.results_path(), &registry.metrics_rows())?;
    if let Some((kind, metrics)) = registry.lowest_rmse() {
        info!("Lowest test RMSE: {} ({})", kind, metrics);
    }
    Ok(registry)
}

#[instrument(skip_all, fields(horizon = config.horizon_hours))]
pub fn forecast(config: &ForecastConfig) -> Result<ForecastTable, AqiError> {
    let features = read_features(config.features_path())?;
    let last = FeatureState::try_from(last_known_row(&features)?)?;
    let scaler: StandardScaler = load_artifact(config.scaler_path())?;
    let models = load_models(config.models_dir())?;
    info!(
        "Forecasting {} hours from {} with {} models",
        config.horizon_hours,
        last.timestamp,
        models.len()
    );

    let mut table = ForecastTable::default();
    for model in &models {
        let points = run_forecast(model, &scaler, &last, config.horizon_hours)?;
        table.add_column(model.name(), &points)?;
    }
    table.write(config.forecast_path())?;
    Ok(table)
}

/// Merges the latest forecast file into the history, tagged with `run_date`.
#[instrument(skip_all, fields(run_date = %run_date))]
pub fn history(config: &ForecastConfig, run_date: NaiveDate) -> Result<ForecastHistory, AqiError> {
    let run = ForecastTable::read(config.forecast_path())?;
    let existing = ForecastHistory::read(config.history_path())?;
    let merged = reconcile(existing, &run, run_date);
    merged.write(config.history_path())?;
    Ok(merged)
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Every stage in order. A partial ingest still lets the later stages run on
/// whatever is stored.
pub async fn run_all(config: &ForecastConfig) -> Result<IngestReport, AqiError> {
    let report = ingest(config).await?;
    if let Some(failure) = &report.failure {
        warn!("Continuing after partial ingest: {}", failure);
    }
    let rows = features(config)?;
    info!("Derived {} feature rows", rows);
    preprocess(config)?;
    train(config)?;
    forecast(config)?;
    history(config, today())?;
    Ok(report)
}
