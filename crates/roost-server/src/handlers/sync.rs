//! Manual mirror control

use axum::extract::State;
use serde::Serialize;
use tracing::warn;

use roost_core::mirror::{reconcile_all, FlushReport, ReconcileReport};
use roost_core::MirrorState;

use crate::response::ApiResponse;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub flush: FlushReport,
    pub reconcile: ReconcileReport,
}

#[derive(Debug, Serialize)]
pub struct SyncStatus {
    pub state: MirrorState,
    pub backend: Option<&'static str>,
    pub queued: usize,
}

/// Flush the queue, then reconcile every mirrored table
pub async fn trigger(State(state): State<AppState>) -> ApiResponse<SyncReport> {
    let report = run_sync(&state).await;

    if !state.mirror.is_mirrored() {
        return ApiResponse::with_warning(report, "Cloud mirror is not connected");
    }
    if !report.reconcile.failed.is_empty() {
        let failed = report.reconcile.failed.join(", ");
        return ApiResponse::with_warning(report, format!("Some tables failed to sync: {}", failed));
    }
    ApiResponse::ok(report)
}

/// Runs on the mirror worker when one is attached
async fn run_sync(state: &AppState) -> SyncReport {
    if let Some(worker) = &state.worker {
        if let Some(flush) = worker.flush().await {
            if let Some(reconcile) = worker.reconcile().await {
                return SyncReport { flush, reconcile };
            }
        }
        warn!("mirror worker is not running, syncing in the request");
    }

    let flush = state.mirror.flush().await;
    let reconcile = reconcile_all(&state.mirror, &state.store).await;
    SyncReport { flush, reconcile }
}

pub async fn status(State(state): State<AppState>) -> ApiResponse<SyncStatus> {
    ApiResponse::ok(SyncStatus {
        state: state.mirror.state(),
        backend: state.mirror.backend_name(),
        queued: state.mirror.queue_len().await,
    })
}
