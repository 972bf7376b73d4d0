//! CacheWriter - response queue の結果を cache に書く
//!
//! 1 件の結果につき、カテゴリごとの座標 key を書いてから id key を書く。
//! 途中で失敗したら残りは書かず、ack もしない（再配送で最初から書き直す）。
//! 同じ結果を何度書いても同じ値になるので、再配送や重複 publish は害にならない。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::consumer::MessageHandler;
use crate::config::CacheConfig;
use crate::domain::{CacheKeys, ErrorKind, ForecastResult, QueueMessage};
use crate::ports::{CacheError, CorrelationCache, DeliveryQueue};

pub struct CacheWriter {
    cache: Arc<dyn CorrelationCache>,
    responses: Arc<dyn DeliveryQueue>,
    keys: CacheKeys,
    ttl: Duration,
}

impl CacheWriter {
    pub fn new(
        config: &CacheConfig,
        cache: Arc<dyn CorrelationCache>,
        responses: Arc<dyn DeliveryQueue>,
    ) -> Self {
        Self {
            cache,
            responses,
            keys: CacheKeys::new(config.scope.clone()),
            ttl: config.ttl,
        }
    }

    /// Write every key for one result; stops at the first failure.
    pub async fn write(&self, result: &ForecastResult) -> Result<(), CacheError> {
        for (category, summary) in &result.forecasts {
            let key = self
                .keys
                .coordinate(&result.latitude, &result.longitude, category);
            self.cache.set(&key, summary, self.ttl).await?;
        }

        if result.request_id.is_empty() {
            return Ok(());
        }
        // Forecasts は BTreeMap なので serialize で失敗しない
        let body = serde_json::to_string(&result.forecasts)
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        self.cache
            .set(&self.keys.request(&result.request_id), &body, self.ttl)
            .await
    }
}

#[async_trait]
impl MessageHandler for CacheWriter {
    async fn handle(&self, message: QueueMessage) {
        let result: ForecastResult = match message.decode() {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    kind = %ErrorKind::Malformed,
                    error = %e,
                    "dropping undecodable forecast result"
                );
                return;
            }
        };

        if result.is_ready() {
            if let Err(e) = self.write(&result).await {
                warn!(
                    message_id = %message.message_id,
                    request_id = %result.request_id,
                    kind = %e.kind(),
                    error = %e,
                    "cache write failed, leaving result for redelivery"
                );
                return;
            }
        } else {
            debug!(message_id = %message.message_id, status = result.status.code(), "nothing to cache");
        }

        match self.responses.delete(&message.receipt).await {
            Ok(()) => debug!(
                message_id = %message.message_id,
                request_id = %result.request_id,
                categories = result.forecasts.len(),
                "result cached"
            ),
            Err(e) => warn!(
                message_id = %message.message_id,
                kind = %e.kind(),
                error = %e,
                "failed to acknowledge cached result"
            ),
        }
    }
}
