//! Loft-wide settings object

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde_json::{Map, Value};

use crate::response::{ApiResponse, ApiResult};
use crate::AppState;

pub async fn show(State(state): State<AppState>) -> ApiResult<Map<String, Value>> {
    Ok(ApiResponse::ok(state.store.settings().await?))
}

/// Replace the settings object
pub async fn replace(
    State(state): State<AppState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<Map<String, Value>> {
    let Json(settings) = payload?;
    state.store.save_settings(settings.clone()).await?;
    Ok(ApiResponse::ok(settings))
}
