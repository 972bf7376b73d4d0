//! consume loop - queue の long poll と並行処理の上限
//!
//! request queue（worker pool）と response queue（cache writer）の両方がこのループで回る。
//!
//! # 実装詳細
//! - receive の前に semaphore の permit を 1 つ取る。上限に達していれば空くまで待つ
//! - 受け取った message ごとに 1 task を spawn し、permit は task が終わるまで持たせる
//! - shutdown が来たら新しい receive をやめ、実行中の task が終わるのを待ってから返る
//!
//! long poll 中に shutdown で receive を打ち切っても、受け取りかけた配送は
//! visibility timeout 後に再配送されるだけなので失われない。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::domain::QueueMessage;
use crate::ports::DeliveryQueue;

/// Processes one delivery. Acknowledging (or not) is the handler's call.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: QueueMessage);
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Loop name used in logs.
    pub name: &'static str,
    pub max_in_flight: usize,
    pub max_messages: usize,
    pub receive_wait: Duration,
    /// Pause after a failed receive.
    pub error_backoff: Duration,
}

impl ConsumerOptions {
    pub fn from_pool(name: &'static str, config: &PoolConfig) -> Self {
        Self {
            name,
            max_in_flight: config.max_in_flight.max(1),
            max_messages: config.max_messages.max(1),
            receive_wait: config.receive_wait,
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Run until `shutdown` flips to true (or its sender is dropped), then drain.
pub async fn consume_loop(
    queue: Arc<dyn DeliveryQueue>,
    handler: Arc<dyn MessageHandler>,
    options: ConsumerOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(options.max_in_flight));
    let tracker = TaskTracker::new();
    info!(consumer = options.name, max_in_flight = options.max_in_flight, "consume loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        // 空きが出るまで待つ（ここでだけ backpressure がかかる）
        let first = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let want = options
            .max_messages
            .min(permits.available_permits() + 1);

        let received = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            received = queue.receive(want, options.receive_wait) => received,
        };

        let messages = match received {
            Ok(messages) => messages,
            Err(e) => {
                warn!(consumer = options.name, kind = %e.kind(), error = %e, "receive failed");
                drop(first);
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(options.error_backoff) => {}
                }
                continue;
            }
        };

        if messages.is_empty() {
            continue;
        }
        debug!(consumer = options.name, count = messages.len(), "received batch");

        let mut first = Some(first);
        for message in messages {
            let permit = match first.take() {
                Some(permit) => permit,
                None => match acquire(&permits).await {
                    Some(permit) => permit,
                    None => break,
                },
            };
            let handler = Arc::clone(&handler);
            tracker.spawn(async move {
                handler.handle(message).await;
                drop(permit);
            });
        }
    }

    tracker.close();
    info!(consumer = options.name, in_flight = tracker.len(), "consume loop stopping, draining in-flight work");
    tracker.wait().await;
    info!(consumer = options.name, "consume loop drained");
}

async fn acquire(permits: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
    match Arc::clone(permits).try_acquire_owned() {
        Ok(permit) => Some(permit),
        Err(_) => Arc::clone(permits).acquire_owned().await.ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryDeliveryQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records peak concurrency and acknowledges after a fixed delay.
    struct SlowHandler {
        queue: Arc<InMemoryDeliveryQueue>,
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
        handled: AtomicUsize,
    }

    impl SlowHandler {
        fn new(queue: Arc<InMemoryDeliveryQueue>, delay: Duration) -> Self {
            Self {
                queue,
                delay,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                handled: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageHandler for SlowHandler {
        async fn handle(&self, message: QueueMessage) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.queue.delete(&message.receipt).await.unwrap();
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn options(max_in_flight: usize) -> ConsumerOptions {
        ConsumerOptions {
            name: "test",
            max_in_flight,
            max_messages: 10,
            receive_wait: Duration::from_secs(1),
            error_backoff: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_capped() {
        let queue = Arc::new(InMemoryDeliveryQueue::new(Duration::from_secs(60)));
        for i in 0..10 {
            queue.send(format!("m{i}")).await.unwrap();
        }
        let handler = Arc::new(SlowHandler::new(queue.clone(), Duration::from_secs(1)));
        let (tx, rx) = watch::channel(false);

        let run = tokio::spawn(consume_loop(queue.clone(), handler.clone(), options(3), rx));

        while handler.handled.load(Ordering::SeqCst) < 10 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tx.send(true).unwrap();
        run.await.unwrap();

        assert_eq!(handler.peak.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_in_flight_handlers() {
        let queue = Arc::new(InMemoryDeliveryQueue::new(Duration::from_secs(60)));
        queue.send("slow".to_string()).await.unwrap();
        let handler = Arc::new(SlowHandler::new(queue.clone(), Duration::from_secs(5)));
        let (tx, rx) = watch::channel(false);

        let run = tokio::spawn(consume_loop(queue.clone(), handler.clone(), options(4), rx));

        while handler.running.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        run.await.unwrap();

        // the handler ran to completion before the loop returned
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_errors_back_off_and_recover() {
        let queue = Arc::new(InMemoryDeliveryQueue::new(Duration::from_secs(60)));
        queue.send("later".to_string()).await.unwrap();
        queue.set_available(false);
        let handler = Arc::new(SlowHandler::new(queue.clone(), Duration::ZERO));
        let (tx, rx) = watch::channel(false);

        let run = tokio::spawn(consume_loop(queue.clone(), handler.clone(), options(1), rx));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);

        queue.set_available(true);
        while handler.handled.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_stops_the_loop() {
        let queue = Arc::new(InMemoryDeliveryQueue::new(Duration::from_secs(60)));
        let handler = Arc::new(SlowHandler::new(queue.clone(), Duration::ZERO));
        let (tx, rx) = watch::channel(false);

        let run = tokio::spawn(consume_loop(queue, handler, options(1), rx));
        drop(tx);
        run.await.unwrap();
    }
}
