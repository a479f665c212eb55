//! Health and statistics

use axum::extract::State;
use serde::Serialize;

use roost_core::storage::StoreStats;
use roost_core::MirrorState;

use crate::response::{ApiResponse, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub mirror: MirrorState,
    pub blob_provider: Option<String>,
}

/// Liveness; always succeeds while the process can answer
pub async fn health(State(state): State<AppState>) -> ApiResponse<HealthReport> {
    ApiResponse::ok(HealthReport {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.server.environment.to_string(),
        mirror: state.mirror.state(),
        blob_provider: state.blobs.active_name().map(str::to_string),
    })
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<StoreStats> {
    Ok(ApiResponse::ok(state.store.stats().await?))
}
