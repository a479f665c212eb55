//! Roost Server
//!
//! REST API over the Roost core library. Every response is wrapped in the
//! envelope from [`response`]; unknown routes get a 404 in the same shape.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, State};
use axum::middleware::map_response_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use http::StatusCode;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use roost_core::{
    BlobStore, BreedingRecord, CloudBackend, CloudMirror, Config, Environment, EventItem,
    FileStore, HealthRecord, MirrorControl, MirrorEvent, NewsItem, Pigeon, RaceRecord, SupabaseBackend,
    TrainingRecord, User,
};

pub mod handlers;
pub mod response;

use handlers::{files, records, settings, sync, system};
use response::{ApiError, ApiResponse, GENERIC_ERROR};

/// Largest accepted request body; uploads are base64 inside JSON
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Services shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: FileStore,
    pub mirror: Arc<CloudMirror>,
    pub blobs: Arc<BlobStore>,
    /// Set once the mirror worker runs; manual syncs go through it
    pub worker: Option<MirrorControl>,
}

impl AppState {
    /// Connect the mirror and open the store
    ///
    /// The mirror is probed here. The returned receiver carries the store's
    /// write events and belongs to the mirror worker.
    pub async fn connect(config: Config) -> Result<(Self, mpsc::UnboundedReceiver<MirrorEvent>)> {
        let backend: Option<Arc<dyn CloudBackend>> = match SupabaseBackend::from_config(&config.sync)
        {
            Some(backend) => Some(Arc::new(
                backend.context("Failed to create cloud mirror client")?,
            )),
            None => None,
        };
        let mirror = Arc::new(CloudMirror::connect(backend).await);
        let (store, events) = FileStore::mirrored(&config.data_dir);
        let blobs = Arc::new(BlobStore::from_config(&config.blob));

        Ok((
            Self {
                config: Arc::new(config),
                store,
                mirror,
                blobs,
                worker: None,
            },
            events,
        ))
    }

    /// State over explicit parts, without touching the environment
    pub fn new(config: Config, store: FileStore, mirror: CloudMirror, blobs: BlobStore) -> Self {
        Self {
            config: Arc::new(config),
            store,
            mirror: Arc::new(mirror),
            blobs: Arc::new(blobs),
            worker: None,
        }
    }

    /// Route manual syncs through a running mirror worker
    pub fn with_worker(mut self, worker: MirrorControl) -> Self {
        self.worker = Some(worker);
        self
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let environment = state.config.server.environment;

    let api = Router::new()
        .route("/health", get(system::health))
        .route("/stats", get(system::stats))
        .nest("/pigeons", records::collection::<Pigeon>())
        .nest("/training", records::collection::<TrainingRecord>())
        .nest("/races", records::collection::<RaceRecord>())
        .nest("/breeding", records::collection::<BreedingRecord>())
        .nest("/health-records", records::collection::<HealthRecord>())
        .nest("/users", records::collection::<User>())
        .nest("/news", records::feed::<NewsItem>())
        .nest("/events", records::feed::<EventItem>())
        .route("/settings", get(settings::show).put(settings::replace))
        .route("/files", post(files::upload))
        .route("/files/*key", get(files::url).delete(files::delete))
        .route("/sync", post(sync::trigger))
        .route("/sync/status", get(sync::status));

    Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .layer(map_response_with_state(environment, hide_internal_errors))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Route not found".to_string())
}

/// Replace 500 bodies with a generic message in production
async fn hide_internal_errors(
    State(environment): State<Environment>,
    response: Response,
) -> Response {
    if environment.is_production() && response.status() == StatusCode::INTERNAL_SERVER_ERROR {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(GENERIC_ERROR.to_string()),
            warning: None,
            details: None,
        };
        return (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
    }
    response
}
