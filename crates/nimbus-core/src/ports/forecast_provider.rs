//! ForecastProvider port - 外部の予報 API
//!
//! 座標ごとに 1 回だけ読み、要求されたカテゴリの `summary` を取り出す。
//! payload 自体がオブジェクトでなければ Payload エラー。
//! レスポンスに無い / 形が違うカテゴリは黙って省く（部分結果はエラーではない）。

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{ErrorKind, Forecasts};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("forecast request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("forecast provider unavailable: {0}")]
    Unavailable(String),

    #[error("undecodable forecast payload: {0}")]
    Payload(String),
}

// URL にはキーが入るので落としてから包む
impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.without_url())
    }
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transient
    }
}

#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn lookup(
        &self,
        latitude: &str,
        longitude: &str,
        categories: &BTreeSet<String>,
    ) -> Result<Forecasts, ProviderError>;
}

/// Pull `<category>.summary` out of a provider payload for each requested category.
///
/// The payload must be a JSON object. Categories that are missing, not objects,
/// or whose `summary` is not a string are left out of the result.
pub fn extract_summaries(
    payload: &Value,
    categories: &BTreeSet<String>,
) -> Result<Forecasts, ProviderError> {
    let Some(payload) = payload.as_object() else {
        return Err(ProviderError::Payload(format!(
            "expected a JSON object, got {}",
            json_type(payload)
        )));
    };

    Ok(categories
        .iter()
        .filter_map(|category| {
            let summary = payload.get(category)?.get("summary")?.as_str()?;
            Some((category.clone(), summary.to_string()))
        })
        .collect())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
