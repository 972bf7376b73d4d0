//! IdGenerator port - ID 生成の抽象化
//!
//! in-memory queue が message id と receipt handle を払い出すのに使う。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（時刻でソート可能、調整なしで生成可能）

use crate::domain::{MessageId, ReceiptHandle};
use crate::ports::Clock;
use ulid::Ulid;

/// # Thread Safety
/// - `Send + Sync` を要求（複数 task から使える）
pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;

    /// 配送ごとに新しい値を返すこと。同じ message の再配送でも使い回さない。
    fn generate_receipt(&self) -> ReceiptHandle;
}

/// Clock を使って現在時刻ベースの ULID を生成する
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_message_id(&self) -> MessageId {
        MessageId::from_ulid(self.next_ulid())
    }

    fn generate_receipt(&self) -> ReceiptHandle {
        ReceiptHandle::from_ulid(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_message_id();
        let id2 = id_gen.generate_message_id();
        let r1 = id_gen.generate_receipt();
        let r2 = id_gen.generate_receipt();

        assert_ne!(id1, id2);
        assert_ne!(r1, r2);
    }

    #[test]
    fn fixed_clock_pins_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_message_id();
        let id2 = id_gen.generate_message_id();

        // ランダム部分があるので ID は異なる
        assert_ne!(id1, id2);

        // timestamp 部分は同じ
        let ts = |id: &MessageId| {
            let ulid = Ulid::from_string(id.as_str().trim_start_matches("msg-")).unwrap();
            ulid.timestamp_ms()
        };
        assert_eq!(ts(&id1), ts(&id2));
        assert_eq!(ts(&id1), fixed_time.timestamp_millis() as u64);
    }
}
