use std::{path::PathBuf, process::ExitCode};

use aqi_forecast::{
    config::ForecastConfig, data::ingest::IngestReport, error::AqiError, logging::setup_tracing,
    pipeline,
};
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(version, about = "Hourly AQI ingestion, training and 72h forecasting")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "AQI_CONFIG")]
    config: Option<PathBuf>,
    /// Directory for log files
    #[arg(long, default_value = "logs")]
    log_dir: String,
    #[command(subcommand)]
    stage: Stage,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Stage {
    /// Fetch provider history into the reading store
    Ingest,
    /// Derive the feature file from stored readings
    Features,
    /// Clean, split and scale the feature file
    Preprocess,
    /// Train and evaluate every predictor
    Train,
    /// Forecast the configured horizon with every trained predictor
    Forecast,
    /// Merge the latest forecast into the forecast history
    History,
    /// Run every stage in order
    Run,
}

/// Exit status for an ingest that stopped at a failing window.
const PARTIAL_INGEST: u8 = 2;

fn ingest_status(report: &IngestReport) -> ExitCode {
    match &report.failure {
        Some(_) => ExitCode::from(PARTIAL_INGEST),
        None => ExitCode::SUCCESS,
    }
}

async fn run_stage(stage: Stage, config: &ForecastConfig) -> Result<ExitCode, AqiError> {
    match stage {
        Stage::Ingest => {
            let report = pipeline::ingest(config).await?;
            info!("{} new readings", report.new_rows);
            return Ok(ingest_status(&report));
        }
        Stage::Features => {
            let rows = pipeline::features(config)?;
            info!("{} feature rows written", rows);
        }
        Stage::Preprocess => {
            let split = pipeline::preprocess(config)?;
            info!(
                "Prepared {} training and {} test rows",
                split.train_targets.len(),
                split.test_targets.len()
            );
        }
        Stage::Train => {
            pipeline::train(config)?;
        }
        Stage::Forecast => {
            let table = pipeline::forecast(config)?;
            info!("{} forecast rows written", table.len());
        }
        Stage::History => {
            let history = pipeline::history(config, pipeline::today())?;
            info!("Forecast history updated. Rows = {}", history.len());
        }
        Stage::Run => {
            let report = pipeline::run_all(config).await?;
            return Ok(ingest_status(&report));
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = match setup_tracing(Some(&cli.log_dir)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialise logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match ForecastConfig::read_config(cli.config.as_ref()) {
        Ok(config) => run_stage(cli.stage, &config).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:?} stage failed: {}", cli.stage, e);
            ExitCode::FAILURE
        }
    }
}
