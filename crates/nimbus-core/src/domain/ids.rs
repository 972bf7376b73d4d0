//! Queue identifiers (strongly-typed IDs).
//!
//! queue provider が払い出す ID は provider ごとに形式が違う
//! （in-memory は ULID、Redis stream は `1700000000000-0` のような entry id）。
//! そのため中身は String のまま持ち、Phantom type で種類だけを区別する。
//!
//! ## Phantom Type パターン
//! `Id<T>` で共通実装を提供しつつ、`T` はマーカー型としてコンパイル時にだけ使う。
//! MessageId と ReceiptHandle を取り違えて `delete` に渡すことはできない。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// 生成時に使うプレフィックス（"msg-", "rcpt-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// provider が払い出した値をそのまま包む
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    /// ULID からプレフィックス付きの ID を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self::new(format!("{}{}", T::prefix(), ulid))
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }
}

// derive(Clone) だと T: Clone を要求してしまうので手で書く
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Message のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {}

impl IdMarker for Message {
    fn prefix() -> &'static str {
        "msg-"
    }
}

/// Receipt のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Receipt {}

impl IdMarker for Receipt {
    fn prefix() -> &'static str {
        "rcpt-"
    }
}

/// Provider-assigned identifier of one logical queue message.
/// The dispatch bridge hands it back to callers as `requestID`.
pub type MessageId = Id<Message>;

/// Token authorizing deletion of one specific delivery of a message.
pub type ReceiptHandle = Id<Receipt>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix() {
        let msg = MessageId::from_ulid(Ulid::new());
        let rcpt = ReceiptHandle::from_ulid(Ulid::new());

        assert!(msg.as_str().starts_with("msg-"));
        assert!(rcpt.as_str().starts_with("rcpt-"));
        // let _: MessageId = rcpt; // <- does not compile
    }

    #[test]
    fn provider_values_are_kept_verbatim() {
        let id = MessageId::new("1700000000000-0");
        assert_eq!(id.to_string(), "1700000000000-0");
        assert_eq!(id.clone().into_string(), "1700000000000-0");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = MessageId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: MessageId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }
}
