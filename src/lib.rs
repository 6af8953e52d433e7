pub mod algorithm;
pub mod config;
pub mod data;
pub mod error;
pub mod forecast;
pub mod logging;
pub mod pipeline;
pub mod util;
