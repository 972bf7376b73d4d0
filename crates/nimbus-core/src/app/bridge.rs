//! DispatchBridge - 同期 API と非同期 worker pool の橋渡し
//!
//! # フロー
//! 1. cache を見る（`requestID` があれば id key、次に座標 key）
//! 2. hit → Ready。queue には触らない
//! 3. id だけの request の miss → Pending（publish しない）
//! 4. miss → request queue に 1 回だけ publish。requestID が無ければ message id で採番
//! 5. 決まった時間だけ待って、座標 key でもう一度だけ cache を見る
//! 6. hit → Ready、miss → Pending（requestID を返して後で poll してもらう）
//!
//! bridge は cache に書かない。cache に書くのは cache writer だけ。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::domain::{CacheKeys, ForecastRequest, ForecastResult, Forecasts};
use crate::ports::{CorrelationCache, DeliveryQueue};

pub const MISSING_COORDINATES: &str = "Require GPS lat/long as input parameters";
pub const MISSING_CATEGORIES: &str = "Require at least one forecast category";

pub struct DispatchBridge {
    cache: Arc<dyn CorrelationCache>,
    requests: Arc<dyn DeliveryQueue>,
    keys: CacheKeys,
    wait: Duration,
    server_name: Option<String>,
}

impl DispatchBridge {
    pub fn new(
        config: &BridgeConfig,
        keys: CacheKeys,
        cache: Arc<dyn CorrelationCache>,
        requests: Arc<dyn DeliveryQueue>,
    ) -> Self {
        Self {
            cache,
            requests,
            keys,
            wait: config.wait,
            server_name: None,
        }
    }

    pub fn with_server_name(mut self, server_name: Option<String>) -> Self {
        self.server_name = server_name;
        self
    }

    /// Answer a request from the cache, enqueueing work on a miss.
    ///
    /// Never fails: queue trouble and bad input come back as `Status::Error`.
    pub async fn dispatch(&self, request: ForecastRequest) -> ForecastResult {
        self.resolve(request)
            .await
            .with_server(self.server_name.clone())
    }

    async fn resolve(&self, request: ForecastRequest) -> ForecastResult {
        if let Some(request_id) = request.request_id.clone() {
            if let Some(forecasts) = self.lookup_by_id(&request_id).await {
                return ForecastResult::ready(&request, request_id, forecasts);
            }
            // id だけの request は poll 専用。miss でも publish しない
            if !request.is_dispatchable() {
                debug!(request_id = %request_id, "poll miss");
                return ForecastResult::pending(&request, request_id);
            }
            debug!(request_id = %request_id, "id miss, falling back to coordinates");
        }

        if !request.has_coordinates() {
            return ForecastResult::error(&request, MISSING_COORDINATES);
        }
        if request.categories.is_empty() {
            return ForecastResult::error(&request, MISSING_CATEGORIES);
        }

        if let Some(forecasts) = self.lookup_by_coordinates(&request).await {
            let request_id = request.request_id.clone().unwrap_or_default();
            return ForecastResult::ready(&request, request_id, forecasts);
        }

        let body = match serde_json::to_string(&request) {
            Ok(body) => body,
            Err(e) => return ForecastResult::error(&request, e.to_string()),
        };
        let message_id = match self.requests.send(body).await {
            Ok(id) => id,
            Err(e) => {
                warn!(kind = %e.kind(), error = %e, "failed to publish forecast request");
                return ForecastResult::error(&request, e.to_string());
            }
        };
        info!(
            message_id = %message_id,
            latitude = %request.latitude,
            longitude = %request.longitude,
            "dispatched forecast request"
        );

        // worker は request 自身の id を優先して結果を書くので、返す id もそれに揃える
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| message_id.as_str().to_string());

        // 待ちは打ち切らない。呼び出し側の切断とは無関係に一度だけ見直す
        tokio::time::sleep(self.wait).await;

        match self.lookup_by_coordinates(&request).await {
            Some(forecasts) => ForecastResult::ready(&request, request_id, forecasts),
            None => ForecastResult::pending(&request, request_id),
        }
    }

    /// id key には request 1 件分のカテゴリ map が JSON で入っている
    async fn lookup_by_id(&self, request_id: &str) -> Option<Forecasts> {
        let raw = self.read(&self.keys.request(request_id)).await?;
        match serde_json::from_str(&raw) {
            Ok(forecasts) => Some(forecasts),
            Err(e) => {
                warn!(request_id, error = %e, "undecodable id cache entry, treating as miss");
                None
            }
        }
    }

    /// 要求された全カテゴリが揃っているときだけ hit
    async fn lookup_by_coordinates(&self, request: &ForecastRequest) -> Option<Forecasts> {
        let mut forecasts = Forecasts::new();
        for category in &request.categories {
            let key = self
                .keys
                .coordinate(&request.latitude, &request.longitude, category);
            let summary = self.read(&key).await?;
            forecasts.insert(category.clone(), summary);
        }
        Some(forecasts)
    }

    /// 読み込み失敗は miss と同じ扱い
    async fn read(&self, key: &str) -> Option<String> {
        match self.cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, kind = %e.kind(), error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }
}
