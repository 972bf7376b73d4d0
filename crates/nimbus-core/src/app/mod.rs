//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **DispatchBridge**: 同期 API の入口（cache → publish → 待つ → cache）
//! - **consume_loop**: long poll + 並行数の上限 + drain 付き shutdown
//! - **ForecastWorker**: request 1 件を provider に問い合わせて結果にする
//! - **ResponseCommitter**: 結果の publish と inbound の ack
//! - **CacheWriter**: response queue の結果を cache に書く
//! - **AppBuilder**: ワイヤリングと起動時検証

pub mod bridge;
pub mod builder;
pub mod cache_writer;
pub mod committer;
pub mod consumer;
pub mod worker_group;
pub mod worker_pool;

// 主要な型を再エクスポート
pub use self::bridge::DispatchBridge;
pub use self::builder::{App, AppBuilder, BuildError, Role};
pub use self::cache_writer::CacheWriter;
pub use self::committer::ResponseCommitter;
pub use self::consumer::{ConsumerOptions, MessageHandler, consume_loop};
pub use self::worker_group::WorkerGroup;
pub use self::worker_pool::{Commit, ForecastWorker, commit_channel};
