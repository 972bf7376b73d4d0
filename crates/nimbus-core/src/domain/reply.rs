//! ForecastReply - HTTP で返す形
//!
//! 単一カテゴリの route は `summary`、複数カテゴリの route は `forecasts` を返す。

use serde::{Deserialize, Serialize};

use super::result::{ForecastResult, Forecasts, Status};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecasts: Option<Forecasts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    pub status: Status,
    #[serde(rename = "requestID", default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl ForecastReply {
    /// Reply for the multi-category route.
    pub fn multi(result: ForecastResult) -> Self {
        let forecasts = result.is_ready().then_some(result.forecasts);
        Self {
            summary: None,
            forecasts,
            err: result.error_detail,
            status: result.status,
            request_id: result.request_id,
            server: result.server,
        }
    }

    /// Reply for the single-category route.
    pub fn single(mut result: ForecastResult, category: &str) -> Self {
        let summary = if result.is_ready() {
            result.forecasts.remove(category)
        } else {
            None
        };
        Self {
            summary,
            forecasts: None,
            err: result.error_detail,
            status: result.status,
            request_id: result.request_id,
            server: result.server,
        }
    }
}
