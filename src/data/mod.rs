pub mod aqi;
pub mod features;
pub mod ingest;
pub mod provider;
pub mod reading;
pub mod store;
