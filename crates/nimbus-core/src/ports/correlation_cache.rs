//! CorrelationCache port - TTL 付き key/value
//!
//! worker 側の結果を同期側の bridge に渡すための唯一の経路。
//! 書き込みは上書き（last writer wins）。同じ key には誰が書いても同じ値が入るので、
//! プロセス内のロックは要らない。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ErrorKind;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transient
    }
}

#[async_trait]
pub trait CorrelationCache: Send + Sync {
    /// `None` for a missing or expired key.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}
