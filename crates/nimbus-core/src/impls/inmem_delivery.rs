//! InMemoryDeliveryQueue - 開発・テスト用の durable queue
//!
//! # 実装詳細
//! - ready（VecDeque<MessageId>）と in_flight（receipt -> 配送情報）の二つで状態を持つ
//! - `receive` で in_flight に移し、visibility timeout を過ぎたら ready に戻す
//! - receipt は配送ごとに新しく発行するので、古い receipt での `delete` は失敗する
//! - long poll は Notify（send 時に起こす）と sleep_until（期限 / visibility 切れ）で待つ
//!
//! 時刻は `tokio::time::Instant` を使う。テストでは `start_paused = true` で決定的に動かせる。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::{MessageId, QueueMessage, ReceiptHandle};
use crate::ports::{DeliveryQueue, IdGenerator, QueueError, SystemClock, UlidGenerator};

struct StoredMessage {
    body: String,
    receive_count: u32,
}

struct Delivery {
    message_id: MessageId,
    visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
    messages: HashMap<MessageId, StoredMessage>,
    ready: VecDeque<MessageId>,
    in_flight: HashMap<ReceiptHandle, Delivery>,
}

impl QueueState {
    /// visibility timeout を過ぎた配送を ready に戻す。
    /// 戻した配送の receipt はここで無効になる。
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<ReceiptHandle> = self
            .in_flight
            .iter()
            .filter(|(_, d)| d.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(delivery) = self.in_flight.remove(&receipt) {
                self.ready.push_back(delivery.message_id);
            }
        }
    }

    fn next_visibility_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|d| d.visible_at).min()
    }
}

pub struct InMemoryDeliveryQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    ids: Arc<dyn IdGenerator>,
    visibility_timeout: Duration,
    available: AtomicBool,
    sent: AtomicUsize,
}

impl InMemoryDeliveryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self::with_id_generator(visibility_timeout, Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(visibility_timeout: Duration, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
            ids,
            visibility_timeout,
            available: AtomicBool::new(true),
            sent: AtomicUsize::new(0),
        }
    }

    /// Fault injection: while unavailable every operation fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful `send` calls so far.
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Messages that could be received right now.
    pub async fn visible_len(&self) -> usize {
        let mut state = self.state.lock().await;
        state.release_expired(Instant::now());
        state.ready.len()
    }

    /// Deliveries handed out and neither deleted nor expired.
    pub async fn in_flight_len(&self) -> usize {
        let mut state = self.state.lock().await;
        state.release_expired(Instant::now());
        state.in_flight.len()
    }

    /// Messages not yet deleted, visible or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable("in-memory queue switched off".to_string()))
        }
    }
}

impl Default for InMemoryDeliveryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(20))
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryDeliveryQueue {
    async fn send(&self, body: String) -> Result<MessageId, QueueError> {
        self.check_available()?;
        let message_id = self.ids.generate_message_id();
        {
            let mut state = self.state.lock().await;
            state.messages.insert(
                message_id.clone(),
                StoredMessage {
                    body,
                    receive_count: 0,
                },
            );
            state.ready.push_back(message_id.clone());
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        // ロックを外してから待機中の receive を起こす
        self.notify.notify_waiters();
        Ok(message_id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        self.check_available()?;
        let deadline = Instant::now() + wait;

        loop {
            // notified() を先に作っておかないと、ロック解放から待機までの間の send を取りこぼす
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.release_expired(now);

                let mut batch = Vec::new();
                while batch.len() < max_messages.max(1) {
                    let Some(message_id) = state.ready.pop_front() else {
                        break;
                    };
                    // delete 済みの id が ready に残っていることがあるので飛ばす
                    let Some(stored) = state.messages.get_mut(&message_id) else {
                        continue;
                    };
                    stored.receive_count += 1;
                    let message = QueueMessage {
                        message_id: message_id.clone(),
                        receipt: self.ids.generate_receipt(),
                        body: stored.body.clone(),
                        receive_count: stored.receive_count,
                    };
                    state.in_flight.insert(
                        message.receipt.clone(),
                        Delivery {
                            message_id,
                            visible_at: now + self.visibility_timeout,
                        },
                    );
                    batch.push(message);
                }

                if !batch.is_empty() {
                    return Ok(batch);
                }
                if now >= deadline {
                    return Ok(Vec::new());
                }

                state
                    .next_visibility_deadline()
                    .map_or(deadline, |visible_at| visible_at.min(deadline))
            };

            tokio::select! {
                _ = &mut notified => {},
                _ = tokio::time::sleep_until(wake_at) => {},
            }
        }
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.release_expired(Instant::now());

        let delivery = state
            .in_flight
            .remove(receipt)
            .ok_or_else(|| QueueError::InvalidReceipt(receipt.clone()))?;
        state.messages.remove(&delivery.message_id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VISIBILITY: Duration = Duration::from_secs(20);

    #[tokio::test(start_paused = true)]
    async fn send_receive_delete_roundtrip() {
        let queue = InMemoryDeliveryQueue::new(VISIBILITY);
        let id = queue.send("hello".to_string()).await.unwrap();

        let batch = queue.receive(1, Duration::from_secs(1)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message_id, id);
        assert_eq!(batch[0].body, "hello");
        assert_eq!(batch[0].receive_count, 1);
        assert_eq!(queue.in_flight_len().await, 1);

        queue.delete(&batch[0].receipt).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_returns_empty_after_wait() {
        let queue = InMemoryDeliveryQueue::new(VISIBILITY);
        let start = Instant::now();
        let batch = queue.receive(1, Duration::from_secs(5)).await.unwrap();
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn receive_respects_max_messages() {
        let queue = InMemoryDeliveryQueue::new(VISIBILITY);
        for i in 0..3 {
            queue.send(format!("m{i}")).await.unwrap();
        }
        let batch = queue.receive(2, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.visible_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_message_is_redelivered_with_new_receipt() {
        let queue = InMemoryDeliveryQueue::new(VISIBILITY);
        queue.send("work".to_string()).await.unwrap();

        let first = queue.receive(1, Duration::ZERO).await.unwrap().remove(0);
        // invisible until the timeout lapses
        assert!(queue.receive(1, Duration::ZERO).await.unwrap().is_empty());

        tokio::time::advance(VISIBILITY + Duration::from_millis(1)).await;
        let second = queue.receive(1, Duration::ZERO).await.unwrap().remove(0);

        assert_eq!(second.message_id, first.message_id);
        assert_ne!(second.receipt, first.receipt);
        assert_eq!(second.receive_count, 2);

        // 古い receipt はもう使えない
        assert!(matches!(
            queue.delete(&first.receipt).await,
            Err(QueueError::InvalidReceipt(_))
        ));
        queue.delete(&second.receipt).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_wakes_on_send() {
        let queue = Arc::new(InMemoryDeliveryQueue::new(VISIBILITY));

        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.receive(1, Duration::from_secs(20)).await.unwrap() }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        queue.send("late".to_string()).await.unwrap();

        let batch = waiter.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_picks_up_expired_delivery() {
        let queue = InMemoryDeliveryQueue::new(Duration::from_secs(2));
        queue.send("retry me".to_string()).await.unwrap();
        let _first = queue.receive(1, Duration::ZERO).await.unwrap();

        let batch = queue.receive(1, Duration::from_secs(10)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].receive_count, 2);
    }

    #[tokio::test]
    async fn unavailable_queue_rejects_operations() {
        let queue = InMemoryDeliveryQueue::new(VISIBILITY);
        queue.set_available(false);

        assert!(matches!(
            queue.send("x".to_string()).await,
            Err(QueueError::Unavailable(_))
        ));
        assert!(queue.ping().await.is_err());
        assert_eq!(queue.sent_count(), 0);

        queue.set_available(true);
        queue.send("x".to_string()).await.unwrap();
        assert_eq!(queue.sent_count(), 1);
    }
}
