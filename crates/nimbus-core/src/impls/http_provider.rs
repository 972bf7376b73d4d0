//! HttpForecastProvider - 本番用の ForecastProvider（reqwest）
//!
//! `GET <base>/<apikey>/<lat>,<lon>` を 1 回だけ呼ぶ。
//! レスポンスはカテゴリ名をキーにしたオブジェクトで、各カテゴリに `summary` 文字列がある。

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::domain::Forecasts;
use crate::ports::{ForecastProvider, ProviderError, extract_summaries};

pub const DEFAULT_BASE_URL: &str = "https://api.forecast.io/forecast";

pub struct HttpForecastProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpForecastProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nimbus/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, latitude: &str, longitude: &str) -> String {
        format!("{}/{}/{latitude},{longitude}", self.base_url, self.api_key)
    }
}

#[async_trait]
impl ForecastProvider for HttpForecastProvider {
    async fn lookup(
        &self,
        latitude: &str,
        longitude: &str,
        categories: &BTreeSet<String>,
    ) -> Result<Forecasts, ProviderError> {
        debug!(latitude, longitude, ?categories, "fetching forecast");

        let response = self
            .client
            .get(self.url(latitude, longitude))
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        let payload: Value =
            serde_json::from_str(&body).map_err(|e| ProviderError::Payload(e.to_string()))?;

        extract_summaries(&payload, categories)
    }
}
