#[derive(Debug, thiserror::Error)]
pub enum AqiError {
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV Error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Serde YAML Error: {0}")]
    SerdeYamlError(#[from] serde_yaml::Error),
    #[error("Serde JSON Error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("HTTP Error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Failed to encode artifact: {0}")]
    EncodeError(#[from] bincode::error::EncodeError),
    #[error("Failed to decode artifact: {0}")]
    DecodeError(#[from] bincode::error::DecodeError),
    #[error("Shape Error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
    #[error("Linfa Error: {0}")]
    LinfaError(#[from] linfa::Error),
    #[error("Forest table Error: {0}")]
    ForestTableError(#[from] randomforest::table::TableError),
    #[error("Failed to parse date: {0}")]
    ParseDateError(#[from] chrono::ParseError),
    #[error("Provider returned an error for window {window}: {reason}")]
    ProviderError { window: String, reason: String },
    #[error("Provider fetch timed out after {seconds}s for window {window}")]
    FetchTimeout { window: String, seconds: u64 },
    #[error("Environment variable {0} is not set")]
    MissingApiKey(&'static str),
    #[error("Invalid provider timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("Readings must be strictly ordered by timestamp (violation at index {index})")]
    UnorderedReadings { index: usize },
    #[error("Non-finite value in {context}")]
    NonFiniteData { context: String },
    #[error("Insufficient data: got {got}, required {required}. Context: {context}")]
    InsufficientData {
        got: usize,
        required: usize,
        context: String,
    },
    #[error("Feature count mismatch: expected {expected}, got {got}")]
    FeatureMismatch { expected: usize, got: usize },
    #[error("No trained model named {0}")]
    ModelNotFound(String),
    #[error("Configuration Error: {0}")]
    ConfigError(String),
    #[error("Invalid forecast history: {0}")]
    InvalidHistory(String),
}
