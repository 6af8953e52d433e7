use std::{
    fs::File,
    io::{BufReader, Write as _},
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::from_reader;
use tracing::{debug, info, instrument};

use crate::{
    algorithm::models::{BoostingSettings, ForestSettings},
    error::AqiError,
    util::date_utils::date_to_datetime,
};

/// Environment variable holding the provider credential.
pub const API_KEY_ENV: &str = "AQI_API_KEY";

pub const READINGS_FILE: &str = "air_quality.csv";
pub const FEATURES_FILE: &str = "aqi_features.csv";
pub const SPLIT_FILE: &str = "prepared_split.bin";
pub const SCALER_FILE: &str = "scaler.bin";
pub const MODELS_DIR: &str = "models";
pub const RESULTS_FILE: &str = "model_results.csv";
pub const FORECAST_FILE: &str = "forecast.csv";
pub const HISTORY_FILE: &str = "forecast_history.csv";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ForecastConfig {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "start-date")]
    pub start_date: String,
    #[serde(rename = "data-dir", default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(rename = "window-days", default = "default_window_days")]
    pub window_days: i64,
    #[serde(rename = "horizon-hours", default = "default_horizon_hours")]
    pub horizon_hours: usize,
    #[serde(rename = "train-ratio", default = "default_train_ratio")]
    pub train_ratio: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(rename = "request-timeout-secs", default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(rename = "provider-url", default = "default_provider_url")]
    pub provider_url: String,
    #[serde(rename = "random-forest", default)]
    pub random_forest: ForestSettings,
    #[serde(rename = "gradient-boosting", default = "BoostingSettings::gradient")]
    pub gradient_boosting: BoostingSettings,
    #[serde(
        rename = "hist-gradient-boosting",
        default = "BoostingSettings::histogram"
    )]
    pub hist_gradient_boosting: BoostingSettings,
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_window_days() -> i64 {
    5
}

fn default_horizon_hours() -> usize {
    72
}

fn default_train_ratio() -> f64 {
    0.8
}

fn default_seed() -> u64 {
    42
}

fn default_timeout() -> u64 {
    30
}

fn default_provider_url() -> String {
    "http://api.openweathermap.org/data/2.5/air_pollution/history".to_string()
}

const DEFAULT_DATA: &str = r#"
latitude: 24.8607
longitude: 67.0011
start-date: "2025-06-01"
data-dir: "data"
window-days: 5
horizon-hours: 72
train-ratio: 0.8
seed: 42
request-timeout-secs: 30
provider-url: "http://api.openweathermap.org/data/2.5/air_pollution/history"
"#;

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            latitude: 24.8607,
            longitude: 67.0011,
            start_date: "2025-06-01".to_string(),
            data_dir: default_data_dir(),
            window_days: default_window_days(),
            horizon_hours: default_horizon_hours(),
            train_ratio: default_train_ratio(),
            seed: default_seed(),
            request_timeout_secs: default_timeout(),
            provider_url: default_provider_url(),
            random_forest: ForestSettings::default(),
            gradient_boosting: BoostingSettings::gradient(),
            hist_gradient_boosting: BoostingSettings::histogram(),
            api_key: None,
        }
    }
}

impl ForecastConfig {
    /// Reads the configuration from a YAML file.
    ///
    /// If the file does not exist, it creates a default configuration file.
    /// The API key is taken from the `AQI_API_KEY` environment variable and
    /// never from the file.
    #[instrument(level = "info", skip(filename))]
    pub fn read_config<P: AsRef<Path>>(filename: Option<P>) -> Result<Self, AqiError> {
        let path = filename
            .map(|p| p.as_ref().to_path_buf())
            .unwrap_or_else(|| Path::new("config.yml").to_path_buf());

        info!(path = %path.display(), "Reading configuration");

        let mut config = if !path.exists() {
            info!(
                "Config file does not exist. Creating default config at {}",
                path.display()
            );
            let mut file = File::create(&path)?;
            file.write_all(DEFAULT_DATA.as_bytes())?;
            debug!("Default configuration file created");
            ForecastConfig::default()
        } else {
            let file = File::open(&path)?;
            let reader = BufReader::new(file);
            from_reader(reader)?
        };
        config.validate()?;
        config.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        info!("Configuration loaded successfully");
        Ok(config)
    }

    fn validate(&self) -> Result<(), AqiError> {
        if self.window_days <= 0 {
            return Err(AqiError::ConfigError(format!(
                "window-days must be positive, got {}",
                self.window_days
            )));
        }
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            return Err(AqiError::ConfigError(format!(
                "train-ratio must be in (0, 1), got {}",
                self.train_ratio
            )));
        }
        self.start_date()?;
        Ok(())
    }

    /// The first day ingestion asks the provider for.
    pub fn start_date(&self) -> Result<NaiveDate, AqiError> {
        let date = NaiveDate::parse_from_str(&self.start_date, "%Y-%m-%d")?;
        Ok(date)
    }

    pub fn start_datetime(&self) -> Result<DateTime<Utc>, AqiError> {
        date_to_datetime(&self.start_date()?)
    }

    pub fn api_key(&self) -> Result<&str, AqiError> {
        self.api_key
            .as_deref()
            .ok_or(AqiError::MissingApiKey(API_KEY_ENV))
    }

    pub fn readings_path(&self) -> PathBuf {
        self.data_dir.join(READINGS_FILE)
    }

    pub fn features_path(&self) -> PathBuf {
        self.data_dir.join(FEATURES_FILE)
    }

    pub fn split_path(&self) -> PathBuf {
        self.data_dir.join(SPLIT_FILE)
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.data_dir.join(SCALER_FILE)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join(MODELS_DIR)
    }

    pub fn results_path(&self) -> PathBuf {
        self.data_dir.join(RESULTS_FILE)
    }

    pub fn forecast_path(&self) -> PathBuf {
        self.data_dir.join(FORECAST_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }
}
