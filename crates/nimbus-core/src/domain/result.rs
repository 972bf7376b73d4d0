//! ForecastResult and the three-way Status.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use super::request::ForecastRequest;

/// category -> summary. Keys are unique; order is irrelevant (BTreeMap keeps output stable).
pub type Forecasts = BTreeMap<String, String>;

/// Status of a forecast as seen by a caller.
///
/// Serialized as an integer: `0` ready, `1` pending, `2` error.
/// Pending and error used to share `1`; they are distinct now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ready,
    Pending,
    Error,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Ready => 0,
            Status::Pending => 1,
            Status::Error => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Status::Ready),
            1 => Some(Status::Pending),
            2 => Some(Status::Error),
            _ => None,
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Status::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown forecast status {code}")))
    }
}

/// Result of one forecast request.
///
/// Built by the worker pool after a successful provider lookup and carried
/// on the response queue; also what the dispatch bridge returns to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastResult {
    #[serde(rename = "requestID", default)]
    pub request_id: String,
    #[serde(rename = "lat", default)]
    pub latitude: String,
    #[serde(rename = "lon", default)]
    pub longitude: String,
    #[serde(default)]
    pub forecasts: Forecasts,
    pub status: Status,
    #[serde(rename = "err", default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Host that answered; lets a caller see load balancing at work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl ForecastResult {
    pub fn ready(request: &ForecastRequest, request_id: impl Into<String>, forecasts: Forecasts) -> Self {
        Self {
            request_id: request_id.into(),
            latitude: request.latitude.clone(),
            longitude: request.longitude.clone(),
            forecasts,
            status: Status::Ready,
            error_detail: None,
            server: None,
        }
    }

    pub fn pending(request: &ForecastRequest, request_id: impl Into<String>) -> Self {
        Self {
            status: Status::Pending,
            ..Self::ready(request, request_id, Forecasts::new())
        }
    }

    pub fn error(request: &ForecastRequest, detail: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            error_detail: Some(detail.into()),
            ..Self::ready(
                request,
                request.request_id.clone().unwrap_or_default(),
                Forecasts::new(),
            )
        }
    }

    pub fn with_server(mut self, server: Option<String>) -> Self {
        self.server = server;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.status == Status::Ready
    }
}
