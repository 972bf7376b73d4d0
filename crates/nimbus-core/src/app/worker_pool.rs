//! Worker pool - request queue の 1 配送を 1 件の結果にする
//!
//! decode → provider lookup → 結果を channel に積む。
//! ここでは ack しない。response queue への publish と inbound の delete は committer の仕事。
//! 失敗した配送は ack されないまま残り、visibility timeout 後に再配送される。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::consumer::MessageHandler;
use crate::config::PoolConfig;
use crate::domain::{ErrorKind, ForecastRequest, ForecastResult, MessageId, QueueMessage, ReceiptHandle};
use crate::ports::ForecastProvider;

/// A finished result waiting to be published, plus the inbound delivery it answers.
#[derive(Debug, Clone)]
pub struct Commit {
    pub result: ForecastResult,
    pub message_id: MessageId,
    pub receipt: ReceiptHandle,
}

/// Bounded hand-off between workers and the committer; full means workers wait.
pub fn commit_channel(capacity: usize) -> (mpsc::Sender<Commit>, mpsc::Receiver<Commit>) {
    mpsc::channel(capacity.max(1))
}

pub struct ForecastWorker {
    provider: Arc<dyn ForecastProvider>,
    commits: mpsc::Sender<Commit>,
    delay: Duration,
    server_name: Option<String>,
}

impl ForecastWorker {
    pub fn new(
        config: &PoolConfig,
        provider: Arc<dyn ForecastProvider>,
        commits: mpsc::Sender<Commit>,
    ) -> Self {
        Self {
            provider,
            commits,
            delay: config.worker_delay,
            server_name: None,
        }
    }

    pub fn with_server_name(mut self, server_name: Option<String>) -> Self {
        self.server_name = server_name;
        self
    }
}

#[async_trait]
impl MessageHandler for ForecastWorker {
    async fn handle(&self, message: QueueMessage) {
        let request: ForecastRequest = match message.decode() {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    kind = %ErrorKind::Malformed,
                    error = %e,
                    "dropping undecodable forecast request"
                );
                return;
            }
        };
        if !request.is_dispatchable() {
            warn!(
                message_id = %message.message_id,
                kind = %ErrorKind::Malformed,
                "dropping forecast request without coordinates or categories"
            );
            return;
        }

        let forecasts = match self
            .provider
            .lookup(&request.latitude, &request.longitude, &request.categories)
            .await
        {
            Ok(forecasts) => forecasts,
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    kind = %e.kind(),
                    error = %e,
                    "forecast lookup failed, leaving delivery for redelivery"
                );
                return;
            }
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| message.message_id.to_string());
        debug!(
            message_id = %message.message_id,
            request_id = %request_id,
            categories = forecasts.len(),
            "forecast ready"
        );

        let commit = Commit {
            result: ForecastResult::ready(&request, request_id, forecasts)
                .with_server(self.server_name.clone()),
            message_id: message.message_id,
            receipt: message.receipt,
        };
        // committer が先に止まっていたら、配送は再配送に任せる
        if self.commits.send(commit).await.is_err() {
            warn!("committer is gone, leaving delivery for redelivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Status;
    use crate::impls::StaticForecastProvider;
    use serde_json::json;

    fn pool_config() -> PoolConfig {
        crate::config::Config::default().pool
    }

    fn message(id: &str, body: &str) -> QueueMessage {
        QueueMessage {
            message_id: MessageId::new(id),
            receipt: ReceiptHandle::new(format!("rcpt-{id}")),
            body: body.to_string(),
            receive_count: 1,
        }
    }

    fn provider() -> Arc<StaticForecastProvider> {
        Arc::new(StaticForecastProvider::new().with_payload(
            "10",
            "20",
            json!({"hourly": {"summary": "Fog"}, "daily": {"summary": "Clearing"}}),
        ))
    }

    #[tokio::test]
    async fn successful_lookup_is_queued_for_commit() {
        let (tx, mut rx) = commit_channel(4);
        let worker = ForecastWorker::new(&pool_config(), provider(), tx)
            .with_server_name(Some("worker-1".to_string()));

        worker
            .handle(message("msg-1", r#"{"lat":"10","lon":"20","summaries":["hourly","minutely"]}"#))
            .await;

        let commit = rx.try_recv().unwrap();
        assert_eq!(commit.receipt.as_str(), "rcpt-msg-1");
        assert_eq!(commit.result.status, Status::Ready);
        assert_eq!(commit.result.request_id, "msg-1");
        assert_eq!(commit.result.server.as_deref(), Some("worker-1"));
        // minutely is not in the payload
        assert_eq!(commit.result.forecasts.len(), 1);
        assert_eq!(commit.result.forecasts["hourly"], "Fog");
    }

    #[tokio::test]
    async fn request_id_in_body_wins_over_message_id() {
        let (tx, mut rx) = commit_channel(4);
        let worker = ForecastWorker::new(&pool_config(), provider(), tx);

        worker
            .handle(message(
                "msg-2",
                r#"{"lat":"10","lon":"20","summaries":["daily"],"requestID":"caller-7"}"#,
            ))
            .await;

        assert_eq!(rx.try_recv().unwrap().result.request_id, "caller-7");
    }

    #[tokio::test]
    async fn undecodable_body_is_dropped() {
        let (tx, mut rx) = commit_channel(4);
        let provider = provider();
        let worker = ForecastWorker::new(&pool_config(), provider.clone(), tx);

        worker.handle(message("msg-3", "not json")).await;
        worker.handle(message("msg-4", r#"{"lat":"10"}"#)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn provider_failure_is_dropped() {
        let (tx, mut rx) = commit_channel(4);
        let provider = provider();
        provider.set_failing(true);
        let worker = ForecastWorker::new(&pool_config(), provider.clone(), tx);

        worker
            .handle(message("msg-5", r#"{"lat":"10","lon":"20","summaries":["hourly"]}"#))
            .await;

        assert!(rx.try_recv().is_err());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_applies_backpressure() {
        let (tx, mut rx) = commit_channel(1);
        let worker = Arc::new(ForecastWorker::new(&pool_config(), provider(), tx));
        let body = r#"{"lat":"10","lon":"20","summaries":["hourly"]}"#;

        worker.handle(message("msg-6", body)).await;
        let blocked = tokio::spawn({
            let worker = worker.clone();
            async move { worker.handle(message("msg-7", body)).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.recv().await.unwrap().message_id.as_str(), "msg-6");
        blocked.await.unwrap();
        assert_eq!(rx.recv().await.unwrap().message_id.as_str(), "msg-7");
    }

    #[tokio::test(start_paused = true)]
    async fn worker_delay_is_applied() {
        let (tx, mut rx) = commit_channel(1);
        let config = PoolConfig {
            worker_delay: Duration::from_millis(500),
            ..pool_config()
        };
        let worker = ForecastWorker::new(&config, provider(), tx);

        let start = tokio::time::Instant::now();
        worker
            .handle(message("msg-8", r#"{"lat":"10","lon":"20","summaries":["hourly"]}"#))
            .await;

        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(rx.try_recv().is_ok());
    }
}
