//! nimbus-core
//!
//! Forecast リクエストを queue 経由の worker pool に橋渡しするためのコア部品。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（request, result, reply, message, ids, cache_key, errors）
//! - **ports**: 抽象化レイヤー（DeliveryQueue, CorrelationCache, ForecastProvider, Clock）
//! - **impls**: 実装（InMemory 系は開発・テスト用、Redis / HTTP は本番用）
//! - **app**: アプリケーションロジック（bridge, worker_pool, committer, cache_writer, builder）
//! - **config**: 環境変数から組み立てる不変の設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{App, AppBuilder, DispatchBridge, Role, WorkerGroup};
pub use config::{Config, ConfigError};
pub use domain::{ForecastReply, ForecastRequest, ForecastResult, Status};
