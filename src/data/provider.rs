use std::{future::Future, time::Duration};

use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::{
    config::ForecastConfig,
    data::reading::{ProviderRecord, ProviderResponse},
    error::AqiError,
    util::date_utils::FetchWindow,
};

/// Source of historical pollutant readings for one fixed location.
pub trait AirQualityProvider {
    fn fetch(
        &self,
        window: &FetchWindow,
    ) -> impl Future<Output = Result<Vec<ProviderRecord>, AqiError>> + Send;
}

/// OpenWeatherMap air pollution history client.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: Client,
    url: String,
    latitude: f64,
    longitude: f64,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(config: &ForecastConfig) -> Result<Self, AqiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.provider_url.clone(),
            latitude: config.latitude,
            longitude: config.longitude,
            api_key: config.api_key()?.to_string(),
        })
    }
}

impl AirQualityProvider for OpenWeatherClient {
    #[instrument(skip(self), fields(window = %window))]
    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<ProviderRecord>, AqiError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("lat", self.latitude.to_string()),
                ("lon", self.longitude.to_string()),
                ("start", window.start_epoch().to_string()),
                ("end", window.end_epoch().to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AqiError::ProviderError {
                window: window.to_string(),
                reason: format!("HTTP {}: {}", status, body),
            });
        }

        let text = response.text().await?;
        let body: ProviderResponse = serde_json::from_str(&text)?;
        debug!("Provider returned {} records", body.list.len());
        Ok(body.list)
    }
}
