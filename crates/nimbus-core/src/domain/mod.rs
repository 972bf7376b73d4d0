//! Domain model (requests, results, queue envelopes, cache keys, ...).
//!
//! I/O を一切持たない型だけを置く。queue / cache / provider との境界は `ports` 側。

pub mod cache_key;
pub mod errors;
pub mod ids;
pub mod message;
pub mod reply;
pub mod request;
pub mod result;

pub use cache_key::CacheKeys;
pub use errors::ErrorKind;
pub use ids::{MessageId, ReceiptHandle};
pub use message::QueueMessage;
pub use reply::ForecastReply;
pub use request::ForecastRequest;
pub use result::{ForecastResult, Forecasts, Status};
