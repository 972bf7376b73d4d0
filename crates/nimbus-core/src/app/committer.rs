//! ResponseCommitter - 結果の publish と inbound の ack
//!
//! channel の唯一の consumer。届いた順に
//! 1. 結果を response queue に publish
//! 2. 成功したら request queue の配送を delete
//!
//! どちらかが失敗したらその件は捨てる（inbound は再配送される）。
//! publish 済みで delete に失敗した場合は結果が二重に publish されうるが、
//! cache writer の書き込みは冪等なので問題にならない。

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::worker_pool::Commit;
use crate::ports::DeliveryQueue;

pub struct ResponseCommitter {
    requests: Arc<dyn DeliveryQueue>,
    responses: Arc<dyn DeliveryQueue>,
}

impl ResponseCommitter {
    pub fn new(requests: Arc<dyn DeliveryQueue>, responses: Arc<dyn DeliveryQueue>) -> Self {
        Self {
            requests,
            responses,
        }
    }

    /// Commit items until every sender is gone. Returns how many were fully committed.
    pub async fn run(self, mut commits: mpsc::Receiver<Commit>) -> usize {
        let mut committed = 0;
        while let Some(commit) = commits.recv().await {
            if self.commit(commit).await {
                committed += 1;
            }
        }
        info!(committed, "committer drained");
        committed
    }

    async fn commit(&self, commit: Commit) -> bool {
        let body = match serde_json::to_string(&commit.result) {
            Ok(body) => body,
            Err(e) => {
                warn!(message_id = %commit.message_id, error = %e, "failed to serialize result");
                return false;
            }
        };

        let response_id = match self.responses.send(body).await {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    message_id = %commit.message_id,
                    kind = %e.kind(),
                    error = %e,
                    "failed to publish result, leaving request for redelivery"
                );
                return false;
            }
        };

        if let Err(e) = self.requests.delete(&commit.receipt).await {
            warn!(
                message_id = %commit.message_id,
                kind = %e.kind(),
                error = %e,
                "failed to acknowledge request after publishing its result"
            );
            return false;
        }

        debug!(
            message_id = %commit.message_id,
            response_id = %response_id,
            request_id = %commit.result.request_id,
            "result committed"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::worker_pool::commit_channel;
    use crate::domain::{ForecastRequest, ForecastResult, Forecasts, QueueMessage};
    use crate::impls::InMemoryDeliveryQueue;
    use std::time::Duration;

    struct Fixture {
        requests: Arc<InMemoryDeliveryQueue>,
        responses: Arc<InMemoryDeliveryQueue>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                requests: Arc::new(InMemoryDeliveryQueue::new(Duration::from_secs(20))),
                responses: Arc::new(InMemoryDeliveryQueue::new(Duration::from_secs(20))),
            }
        }

        fn committer(&self) -> ResponseCommitter {
            ResponseCommitter::new(self.requests.clone(), self.responses.clone())
        }

        /// Put one request in flight and build the commit that answers it.
        async fn in_flight_commit(&self) -> Commit {
            let request = ForecastRequest::new("10", "20", ["hourly"]);
            self.requests
                .send(serde_json::to_string(&request).unwrap())
                .await
                .unwrap();
            let delivery: QueueMessage = self
                .requests
                .receive(1, Duration::ZERO)
                .await
                .unwrap()
                .remove(0);

            let mut forecasts = Forecasts::new();
            forecasts.insert("hourly".into(), "Hail".into());
            Commit {
                result: ForecastResult::ready(&request, delivery.message_id.as_str(), forecasts),
                message_id: delivery.message_id,
                receipt: delivery.receipt,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_then_acknowledges() {
        let f = Fixture::new();
        let commit = f.in_flight_commit().await;
        let expected = commit.result.clone();

        let (tx, rx) = commit_channel(4);
        tx.send(commit).await.unwrap();
        drop(tx);

        assert_eq!(f.committer().run(rx).await, 1);
        assert!(f.requests.is_empty().await);

        let published = f.responses.receive(1, Duration::ZERO).await.unwrap().remove(0);
        assert_eq!(published.decode::<ForecastResult>().unwrap(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_leaves_the_request_in_flight() {
        let f = Fixture::new();
        let commit = f.in_flight_commit().await;
        f.responses.set_available(false);

        let (tx, rx) = commit_channel(4);
        tx.send(commit).await.unwrap();
        drop(tx);

        assert_eq!(f.committer().run(rx).await, 0);
        assert_eq!(f.requests.in_flight_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_receipt_is_reported_but_result_stays_published() {
        let f = Fixture::new();
        let commit = f.in_flight_commit().await;
        // visibility lapses before the commit: the receipt is no longer valid
        tokio::time::advance(Duration::from_secs(21)).await;

        let (tx, rx) = commit_channel(4);
        tx.send(commit).await.unwrap();
        drop(tx);

        assert_eq!(f.committer().run(rx).await, 0);
        assert_eq!(f.responses.sent_count(), 1);
        assert_eq!(f.requests.visible_len().await, 1);
    }
}
