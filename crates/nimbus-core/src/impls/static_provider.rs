//! StaticForecastProvider - 開発・テスト用の ForecastProvider
//!
//! 座標ごとに provider の生 payload（JSON）を登録しておき、
//! HTTP 版と同じ `extract_summaries` でカテゴリを取り出す。

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::Forecasts;
use crate::ports::{ForecastProvider, ProviderError, extract_summaries};

#[derive(Default)]
pub struct StaticForecastProvider {
    payloads: Mutex<HashMap<(String, String), Value>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl StaticForecastProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the payload returned for `(latitude, longitude)`.
    pub fn with_payload(self, latitude: &str, longitude: &str, payload: Value) -> Self {
        self.insert(latitude, longitude, payload);
        self
    }

    pub fn insert(&self, latitude: &str, longitude: &str, payload: Value) {
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.insert((latitude.to_string(), longitude.to_string()), payload);
        }
    }

    /// Fault injection: every lookup fails while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForecastProvider for StaticForecastProvider {
    async fn lookup(
        &self,
        latitude: &str,
        longitude: &str,
        categories: &BTreeSet<String>,
    ) -> Result<Forecasts, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("static provider switched off".to_string()));
        }

        let payloads = self
            .payloads
            .lock()
            .map_err(|_| ProviderError::Unavailable("payload table poisoned".to_string()))?;
        // 未登録の座標は空の payload と同じ扱い（全カテゴリ省略）
        match payloads.get(&(latitude.to_string(), longitude.to_string())) {
            Some(payload) => extract_summaries(payload, categories),
            None => Ok(Forecasts::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn categories(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn returns_requested_categories() {
        let provider = StaticForecastProvider::new().with_payload(
            "37.8267",
            "-122.4233",
            json!({
                "hourly": {"summary": "Partly cloudy"},
                "daily": {"summary": "Rain on Sunday"},
            }),
        );

        let got = provider
            .lookup("37.8267", "-122.4233", &categories(&["hourly", "minutely"]))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["hourly"], "Partly cloudy");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn unknown_coordinates_yield_no_categories() {
        let provider = StaticForecastProvider::new();
        let got = provider.lookup("0", "0", &categories(&["hourly"])).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn failure_toggle() {
        let provider = StaticForecastProvider::new();
        provider.set_failing(true);
        assert!(provider.lookup("0", "0", &categories(&["hourly"])).await.is_err());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn non_object_payload_fails_the_lookup() {
        let provider = StaticForecastProvider::new().with_payload("1", "2", json!("sunny"));
        let err = provider.lookup("1", "2", &categories(&["hourly"])).await.unwrap_err();
        assert!(matches!(err, ProviderError::Payload(_)));
    }
}
