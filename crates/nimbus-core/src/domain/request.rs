//! ForecastRequest - 位置とカテゴリの組
//!
//! 単一カテゴリ版（`forecastType`）と複数カテゴリ版（`summaries`）の二つの wire 形式を
//! 一つのモデルに統一する。単一カテゴリは要素 1 の集合として扱う。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A forecast lookup for one coordinate pair.
///
/// Callers address a request either by `(lat, lon, categories)` or by the
/// `request_id` handed back from an earlier pending dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "WireRequest")]
pub struct ForecastRequest {
    #[serde(rename = "lat")]
    pub latitude: String,
    #[serde(rename = "lon")]
    pub longitude: String,
    #[serde(rename = "summaries")]
    pub categories: BTreeSet<String>,
    #[serde(rename = "requestID", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ForecastRequest {
    pub fn new<I, S>(latitude: impl Into<String>, longitude: impl Into<String>, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            latitude: latitude.into(),
            longitude: longitude.into(),
            categories: normalize(categories),
            request_id: None,
        }
    }

    /// Poll-only request: addresses an earlier dispatch by its id.
    pub fn by_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()).filter(|id| !id.is_empty()),
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into()).filter(|id| !id.is_empty());
        self
    }

    pub fn has_coordinates(&self) -> bool {
        !self.latitude.is_empty() && !self.longitude.is_empty()
    }

    /// Coordinates and at least one category: enough to enqueue work.
    pub fn is_dispatchable(&self) -> bool {
        self.has_coordinates() && !self.categories.is_empty()
    }
}

fn normalize<I, S>(categories: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    categories
        .into_iter()
        .map(Into::into)
        .filter(|c| !c.is_empty())
        .collect()
}

/// 受信側の wire 形式。`summaries` と `forecastType` のどちらでも受け付ける。
#[derive(Deserialize)]
struct WireRequest {
    #[serde(default)]
    lat: String,
    #[serde(default)]
    lon: String,
    #[serde(default)]
    summaries: Vec<String>,
    #[serde(default, rename = "forecastType")]
    forecast_type: Option<String>,
    #[serde(default, rename = "requestID")]
    request_id: Option<String>,
}

impl From<WireRequest> for ForecastRequest {
    fn from(wire: WireRequest) -> Self {
        let categories = normalize(wire.summaries.into_iter().chain(wire.forecast_type));
        Self {
            latitude: wire.lat,
            longitude: wire.lon,
            categories,
            request_id: wire.request_id.filter(|id| !id.is_empty()),
        }
    }
}
