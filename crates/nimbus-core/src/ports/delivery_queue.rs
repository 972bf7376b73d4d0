//! DeliveryQueue port - durable queue（Redis stream または InMemory）
//!
//! request queue と response queue の両方がこの trait で表される。
//!
//! # 設計原則
//! - at-least-once: `delete` されなかった配送は visibility timeout 後に再び見えるようになる
//! - receipt は配送ごとに発行される。古い receipt での `delete` はエラー
//! - `receive` は long poll（`wait` の間、何も来なければ空の Vec を返す）

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ErrorKind, MessageId, QueueMessage, ReceiptHandle};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("receipt {0} is not valid for any in-flight delivery")]
    InvalidReceipt(ReceiptHandle),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed queue entry: {0}")]
    Malformed(String),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Malformed(_) => ErrorKind::Malformed,
            _ => ErrorKind::Transient,
        }
    }
}

#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Publish a serialized body. The queue assigns the message id.
    async fn send(&self, body: String) -> Result<MessageId, QueueError>;

    /// Long-poll for up to `max_messages` visible messages, waiting at most `wait`.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge one delivery.
    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Startup reachability check.
    async fn ping(&self) -> Result<(), QueueError>;
}
