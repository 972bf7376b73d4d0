//! RedisStreamQueue - 本番用の DeliveryQueue（Redis stream + consumer group）
//!
//! # 対応関係
//! - send: `XADD <stream> * body <json>`。entry id がそのまま MessageId になる
//! - receive: まず `XPENDING .. IDLE` で visibility timeout を過ぎた配送を探して `XCLAIM`、
//!   無ければ `XREADGROUP .. >` で新しい entry を読む
//! - delete: `XACK` してから `XDEL`
//!
//! long poll は `BLOCK` を使わず、`poll_interval` ごとに読み直して `wait` まで粘る。
//! multiplexed connection を BLOCK で塞がないため。
//!
//! receipt は `<entry id>/<nonce>`。XACK は entry id 単位なので、
//! 同じ entry の古い receipt と新しい receipt は区別できない（in-memory 版より弱い）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{Client, Value, aio::MultiplexedConnection};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{MessageId, QueueMessage, ReceiptHandle};
use crate::ports::{DeliveryQueue, IdGenerator, QueueError, SystemClock, UlidGenerator};

const BODY_FIELD: &str = "body";

#[derive(Debug, Clone)]
pub struct RedisStreamOptions {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
}

impl RedisStreamOptions {
    pub fn new(stream: impl Into<String>, group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            visibility_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }
}

pub struct RedisStreamQueue {
    connection: MultiplexedConnection,
    options: RedisStreamOptions,
    ids: Arc<dyn IdGenerator>,
}

impl RedisStreamQueue {
    pub async fn connect(redis_url: &str, options: RedisStreamOptions) -> Result<Self, QueueError> {
        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!(
            stream = %options.stream,
            group = %options.group,
            consumer = %options.consumer,
            "connected to redis stream"
        );

        let queue = Self {
            connection,
            options,
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        };
        queue.ensure_consumer_group().await?;
        Ok(queue)
    }

    pub fn stream(&self) -> &str {
        &self.options.stream
    }

    async fn ensure_consumer_group(&self) -> Result<(), QueueError> {
        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.options.stream)
            .arg(&self.options.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.connection.clone())
            .await;

        match result {
            Ok(_) => {
                info!(stream = %self.options.stream, group = %self.options.group, "created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %self.options.stream, group = %self.options.group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(QueueError::Redis(e)),
        }
    }

    /// visibility timeout を過ぎた pending entry を自分に付け替える
    async fn claim_idle(&self, count: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let min_idle_ms = self.options.visibility_timeout.as_millis() as u64;

        let pending: Value = redis::cmd("XPENDING")
            .arg(&self.options.stream)
            .arg(&self.options.group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut self.connection.clone())
            .await?;

        let pending = parse_pending(&pending);
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.options.stream)
            .arg(&self.options.group)
            .arg(&self.options.consumer)
            .arg(min_idle_ms);
        for (entry_id, _) in &pending {
            cmd.arg(entry_id);
        }
        let claimed: Value = cmd.query_async(&mut self.connection.clone()).await?;

        let messages: Vec<QueueMessage> = parse_entries(&claimed)
            .into_iter()
            .map(|(entry_id, body)| {
                // XCLAIM で配送回数が 1 増える
                let delivered = pending
                    .iter()
                    .find(|(id, _)| *id == entry_id)
                    .map_or(1, |(_, count)| count + 1);
                self.to_message(entry_id, body, delivered)
            })
            .collect();

        if !messages.is_empty() {
            debug!(stream = %self.options.stream, count = messages.len(), "claimed idle deliveries");
        }
        Ok(messages)
    }

    async fn read_new(&self, count: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.options.group)
            .arg(&self.options.consumer)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.options.stream)
            .arg(">")
            .query_async(&mut self.connection.clone())
            .await?;

        let mut messages = Vec::new();
        if let Value::Array(streams) = reply {
            for stream in &streams {
                let Value::Array(stream_data) = stream else {
                    continue;
                };
                if let Some(entries) = stream_data.get(1) {
                    for (entry_id, body) in parse_entries(entries) {
                        messages.push(self.to_message(entry_id, body, 1));
                    }
                }
            }
        }
        Ok(messages)
    }

    fn to_message(&self, entry_id: String, body: Option<String>, receive_count: u32) -> QueueMessage {
        let body = body.unwrap_or_else(|| {
            // 空 body は decode で落ちて handler 側で malformed 扱いになる
            warn!(stream = %self.options.stream, entry_id = %entry_id, "stream entry has no body field");
            String::new()
        });
        let receipt = encode_receipt(&entry_id, &self.ids.generate_receipt());
        QueueMessage {
            message_id: MessageId::new(entry_id),
            receipt,
            body,
            receive_count,
        }
    }
}

#[async_trait]
impl DeliveryQueue for RedisStreamQueue {
    async fn send(&self, body: String) -> Result<MessageId, QueueError> {
        let entry_id: String = redis::cmd("XADD")
            .arg(&self.options.stream)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(body)
            .query_async(&mut self.connection.clone())
            .await?;
        debug!(stream = %self.options.stream, entry_id = %entry_id, "published");
        Ok(MessageId::new(entry_id))
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let count = max_messages.max(1);
        let deadline = Instant::now() + wait;

        loop {
            let mut batch = self.claim_idle(count).await?;
            if batch.is_empty() {
                batch = self.read_new(count).await?;
            }
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.options.poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let entry_id = parse_receipt(receipt)?;

        let acked: u64 = redis::cmd("XACK")
            .arg(&self.options.stream)
            .arg(&self.options.group)
            .arg(entry_id)
            .query_async(&mut self.connection.clone())
            .await?;
        if acked == 0 {
            return Err(QueueError::InvalidReceipt(receipt.clone()));
        }

        let _: u64 = redis::cmd("XDEL")
            .arg(&self.options.stream)
            .arg(entry_id)
            .query_async(&mut self.connection.clone())
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.connection.clone())
            .await?;
        Ok(())
    }
}

fn encode_receipt(entry_id: &str, nonce: &ReceiptHandle) -> ReceiptHandle {
    ReceiptHandle::new(format!("{entry_id}/{nonce}"))
}

fn parse_receipt(receipt: &ReceiptHandle) -> Result<&str, QueueError> {
    match receipt.as_str().split_once('/') {
        Some((entry_id, nonce)) if !entry_id.is_empty() && !nonce.is_empty() => Ok(entry_id),
        _ => Err(QueueError::Malformed(format!(
            "receipt {receipt} is not <entry id>/<nonce>"
        ))),
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

/// `[[id, [field, value, ...]], ...]` を (entry id, body) の列にする。
/// XCLAIM は消された entry を nil で返すことがあるので飛ばす。
fn parse_entries(value: &Value) -> Vec<(String, Option<String>)> {
    let Value::Array(entries) = value else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let Value::Array(parts) = entry else {
                return None;
            };
            let entry_id = value_to_string(parts.first()?)?;
            let body = match parts.get(1) {
                Some(Value::Array(fields)) => fields.chunks(2).find_map(|pair| match pair {
                    [key, value] if value_to_string(key).as_deref() == Some(BODY_FIELD) => {
                        value_to_string(value)
                    }
                    _ => None,
                }),
                _ => None,
            };
            Some((entry_id, body))
        })
        .collect()
}

/// XPENDING（拡張形式）の `[[id, consumer, idle_ms, delivered], ...]` から (id, 配送回数)。
fn parse_pending(value: &Value) -> Vec<(String, u32)> {
    let Value::Array(entries) = value else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let Value::Array(parts) = entry else {
                return None;
            };
            let entry_id = value_to_string(parts.first()?)?;
            let delivered = match parts.get(3) {
                Some(Value::Int(n)) => u32::try_from(*n).unwrap_or(u32::MAX),
                _ => 1,
            };
            Some((entry_id, delivered))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn receipt_carries_entry_id() {
        let receipt = encode_receipt("1700000000000-0", &ReceiptHandle::new("rcpt-01ABC"));
        assert_eq!(receipt.as_str(), "1700000000000-0/rcpt-01ABC");
        assert_eq!(parse_receipt(&receipt).unwrap(), "1700000000000-0");
    }

    #[test]
    fn foreign_receipt_is_malformed() {
        let err = parse_receipt(&ReceiptHandle::new("rcpt-01ABC")).unwrap_err();
        assert!(matches!(err, QueueError::Malformed(_)));
    }

    #[test]
    fn entries_are_parsed_with_body() {
        let reply = Value::Array(vec![
            Value::Array(vec![
                bulk("1-0"),
                Value::Array(vec![bulk("body"), bulk(r#"{"lat":"1"}"#)]),
            ]),
            Value::Array(vec![bulk("2-0"), Value::Array(vec![bulk("other"), bulk("x")])]),
            Value::Nil,
        ]);

        let entries = parse_entries(&reply);
        assert_eq!(
            entries,
            vec![
                ("1-0".to_string(), Some(r#"{"lat":"1"}"#.to_string())),
                ("2-0".to_string(), None),
            ]
        );
    }

    #[test]
    fn pending_entries_report_delivery_count() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("1-0"),
            bulk("worker-a"),
            Value::Int(25_000),
            Value::Int(2),
        ])]);
        assert_eq!(parse_pending(&reply), vec![("1-0".to_string(), 2)]);
        assert!(parse_pending(&Value::Nil).is_empty());
    }
}
