use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handle for the background loops of one process.
/// - `request_shutdown()` で全ループに停止を伝える（実行中の処理は止めない）
/// - `shutdown_and_join()` で drain が終わるまで待つ
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<(&'static str, JoinHandle<()>)>,
}

impl WorkerGroup {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    /// Receiver a loop should watch to learn about shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.joins.push((name, tokio::spawn(task)));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new work. In-flight handlers keep running.
    pub fn request_shutdown(&self) {
        // send_replace は receiver がいなくても失敗しない
        self.shutdown_tx.send_replace(true);
    }

    /// Shutdown and wait for every loop, up to `timeout`.
    /// Loops still running at the deadline are aborted; returns false in that case.
    pub async fn shutdown_and_join(mut self, timeout: Duration) -> bool {
        self.request_shutdown();

        let joined = tokio::time::timeout(timeout, async {
            for (name, join) in self.joins.iter_mut() {
                if let Err(e) = join.await {
                    warn!(task = *name, error = %e, "background task ended abnormally");
                }
            }
        })
        .await;

        match joined {
            Ok(()) => {
                info!("all background tasks stopped");
                true
            }
            Err(_) => {
                for (name, join) in &self.joins {
                    if !join.is_finished() {
                        warn!(task = *name, "background task did not drain in time, aborting");
                        join.abort();
                    }
                }
                false
            }
        }
    }
}

impl Default for WorkerGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn loops_see_the_shutdown_signal() {
        let mut group = WorkerGroup::new();
        let mut rx = group.subscribe();
        group.spawn("waiter", async move {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });

        assert_eq!(group.len(), 1);
        assert!(group.shutdown_and_join(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_loop_is_aborted_after_timeout() {
        let mut group = WorkerGroup::new();
        group.spawn("stuck", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        assert!(!group.shutdown_and_join(Duration::from_secs(1)).await);
    }
}
