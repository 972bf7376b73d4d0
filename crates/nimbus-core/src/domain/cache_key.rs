//! Cache key namespace.
//!
//! Two key families live side by side:
//! - coordinate keys `<scope>:<lat>:<lon>:<category>:response`, one summary each,
//!   shared by every caller asking for the same place;
//! - id keys `<scope>:<requestID>:response`, holding the whole category map of
//!   one dispatched request as JSON.

pub const DEFAULT_SCOPE: &str = "weatherService:Cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    scope: String,
}

impl CacheKeys {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    pub fn coordinate(&self, latitude: &str, longitude: &str, category: &str) -> String {
        format!("{}:{latitude}:{longitude}:{category}:response", self.scope)
    }

    pub fn request(&self, request_id: &str) -> String {
        format!("{}:{request_id}:response", self.scope)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new(DEFAULT_SCOPE)
    }
}
