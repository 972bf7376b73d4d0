//! InMemoryCache - 開発・テスト用の TTL cache

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ports::{CacheError, CorrelationCache};

struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    reads_down: AtomicBool,
    writes_down: AtomicBool,
    /// 何回目の set から失敗させるか（0 は無効）
    fail_after: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injection: reads (and ping) fail while down.
    pub fn set_reads_available(&self, available: bool) {
        self.reads_down.store(!available, Ordering::SeqCst);
    }

    /// Fault injection: writes fail while down.
    pub fn set_writes_available(&self, available: bool) {
        self.writes_down.store(!available, Ordering::SeqCst);
    }

    /// Fault injection: let `n` more writes succeed, then fail every write after.
    pub fn fail_writes_after(&self, n: usize) {
        self.writes.store(0, Ordering::SeqCst);
        self.fail_after.store(n + 1, Ordering::SeqCst);
    }

    /// Successful writes since creation or the last `fail_writes_after`.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Live (non-expired) keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CorrelationCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if self.reads_down.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("reads switched off".to_string()));
        }
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        if self.writes_down.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("writes switched off".to_string()));
        }
        let fail_after = self.fail_after.load(Ordering::SeqCst);
        if fail_after > 0 && self.writes.load(Ordering::SeqCst) + 1 >= fail_after {
            return Err(CacheError::Unavailable("write budget exhausted".to_string()));
        }

        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        if self.reads_down.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("cache switched off".to_string()));
        }
        Ok(())
    }
}
