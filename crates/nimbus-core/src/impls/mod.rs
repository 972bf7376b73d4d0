//! Impls - ports の実装
//!
//! # 開発・テスト用
//! - **InMemoryDeliveryQueue**: visibility timeout 付きの at-least-once queue
//! - **InMemoryCache**: TTL 付き key/value
//! - **StaticForecastProvider**: 登録済み payload を返す provider
//!
//! # 本番用
//! - **RedisStreamQueue**: Redis stream + consumer group
//! - **RedisCache**: Redis の `GET` / `SET EX`
//! - **HttpForecastProvider**: reqwest で予報 API を呼ぶ

pub mod http_provider;
pub mod inmem_cache;
pub mod inmem_delivery;
pub mod redis_cache;
pub mod redis_queue;
pub mod static_provider;

// 主要な型を再エクスポート
pub use self::http_provider::HttpForecastProvider;
pub use self::inmem_cache::InMemoryCache;
pub use self::inmem_delivery::InMemoryDeliveryQueue;
pub use self::redis_cache::RedisCache;
pub use self::redis_queue::{RedisStreamOptions, RedisStreamQueue};
pub use self::static_provider::StaticForecastProvider;
