//! HTTP front door
//!
//! - `GET /` → `healthy!`
//! - `POST /forecast` → 複数カテゴリ（`forecasts` を返す）
//! - `POST /forecast/{category}` → 単一カテゴリ（`summary` を返す）
//!
//! 処理は全部 DispatchBridge に任せる。ここは JSON の出し入れだけ。

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use nimbus_core::{DispatchBridge, ForecastReply, ForecastRequest};
use tracing::debug;

#[derive(Clone)]
pub struct HttpState {
    bridge: Arc<DispatchBridge>,
}

/// Health check only when the process runs no frontend.
pub fn router(bridge: Option<Arc<DispatchBridge>>) -> Router {
    let base = Router::new().route("/", get(health));
    match bridge {
        Some(bridge) => base.merge(
            Router::new()
                .route("/forecast", post(forecast))
                .route("/forecast/{category}", post(forecast_single))
                .with_state(HttpState { bridge }),
        ),
        None => base,
    }
}

async fn health() -> &'static str {
    "healthy!\n"
}

async fn forecast(
    State(state): State<HttpState>,
    Json(request): Json<ForecastRequest>,
) -> Json<ForecastReply> {
    debug!(?request, "forecast request");
    let result = state.bridge.dispatch(request).await;
    Json(ForecastReply::multi(result))
}

/// The path names the one category; any categories in the body are ignored.
async fn forecast_single(
    State(state): State<HttpState>,
    Path(category): Path<String>,
    Json(mut request): Json<ForecastRequest>,
) -> Json<ForecastReply> {
    debug!(?request, category = %category, "single-category forecast request");
    request.categories = [category.clone()].into_iter().collect();
    let result = state.bridge.dispatch(request).await;
    Json(ForecastReply::single(result, &category))
}
