//! QueueMessage - queue から受け取った 1 回分の配送
//!
//! body は serialize 済みの ForecastRequest / ForecastResult。
//! receipt は「この配送」を削除するための唯一の資格情報で、再配送されると別の値になる。

use serde::de::DeserializeOwned;

use super::ids::{MessageId, ReceiptHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: MessageId,
    pub receipt: ReceiptHandle,
    pub body: String,
    /// How many times this message has been handed out, this delivery included.
    pub receive_count: u32,
}

impl QueueMessage {
    /// Decode the body into a request or result.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}
