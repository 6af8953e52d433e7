use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::{data::aqi::compute_aqi, error::AqiError, util::date_utils::from_epoch_seconds};

/// One hourly observation as persisted in the reading store.
///
/// `aqi` is never supplied from outside; it is written by [`Reading::normalize`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into, strip_option), default)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub aqi: Option<u32>,
    pub co: Option<f64>,
    pub no: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub nh3: Option<f64>,
}

impl Reading {
    /// Builds an un-normalized reading from a provider record.
    pub fn from_record(record: &ProviderRecord) -> Result<Self, AqiError> {
        let c = &record.components;
        Ok(Self {
            timestamp: from_epoch_seconds(record.dt)?,
            aqi: None,
            co: c.co,
            no: c.no,
            no2: c.no2,
            o3: c.o3,
            so2: c.so2,
            pm2_5: c.pm2_5,
            pm10: c.pm10,
            nh3: c.nh3,
        })
    }

    /// Recomputes `aqi` from the current particulate concentrations.
    pub fn normalize(&mut self) {
        self.aqi = compute_aqi(self.pm2_5, self.pm10);
    }
}

/// Top-level body of the air pollution history endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub list: Vec<ProviderRecord>,
}

/// One entry of the provider's `list` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub dt: i64,
    #[serde(default)]
    pub main: ProviderMain,
    #[serde(default)]
    pub components: Components,
}

/// The provider's own 1-5 level index. Kept for parsing only; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMain {
    pub aqi: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Components {
    pub co: Option<f64>,
    pub no: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub nh3: Option<f64>,
}
