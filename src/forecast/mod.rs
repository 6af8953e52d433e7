pub mod forecaster;
pub mod history;
pub mod state;
