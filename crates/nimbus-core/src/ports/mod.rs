//! Ports - 抽象化レイヤー
//!
//! 外部システム（queue, cache, forecast provider）へのインターフェース。
//! core はここにある trait だけに依存し、Redis / HTTP の詳細は `impls` に閉じ込める。
//!
//! # 設計原則
//! - cache が「結果が出たか」の唯一の正本
//! - queue は at-least-once。ack（delete）するまで visibility timeout 後に再配送される
//! - provider は座標ごとに 1 回だけ読む

pub mod clock;
pub mod correlation_cache;
pub mod delivery_queue;
pub mod forecast_provider;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::correlation_cache::{CacheError, CorrelationCache};
pub use self::delivery_queue::{DeliveryQueue, QueueError};
pub use self::forecast_provider::{ForecastProvider, ProviderError, extract_summaries};
pub use self::id_generator::{IdGenerator, UlidGenerator};
