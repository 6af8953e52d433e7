pub mod metrics;
pub mod models;
pub mod preprocess;
pub mod registry;
