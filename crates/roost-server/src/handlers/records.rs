//! CRUD for the typed collections
//!
//! One generic set of handlers, instantiated per entity type. Validation
//! happens in the store, so a bad payload never reaches the table file.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use roost_core::{Entity, Record};

use crate::response::{ApiError, ApiResponse, ApiResult, Created};
use crate::AppState;

/// Routes for `/` and `/:id` of one collection
pub fn collection<T: Entity + 'static>() -> Router<AppState> {
    Router::new()
        .route("/", get(list::<T>).post(create::<T>))
        .route(
            "/:id",
            get(fetch::<T>)
                .put(update::<T>)
                .patch(update::<T>)
                .delete(remove::<T>),
        )
}

/// Like [`collection`], but a failed read returns an empty list and a warning
pub fn feed<T: Entity + 'static>() -> Router<AppState> {
    Router::new()
        .route("/", get(list_lenient::<T>).post(create::<T>))
        .route("/:id", get(fetch::<T>).delete(remove::<T>))
}

pub async fn list<T: Entity>(State(state): State<AppState>) -> ApiResult<Vec<T>> {
    Ok(ApiResponse::ok(state.store.list::<T>().await?))
}

pub async fn list_lenient<T: Entity>(State(state): State<AppState>) -> ApiResponse<Vec<T>> {
    match state.store.list::<T>().await {
        Ok(items) => ApiResponse::ok(items),
        Err(e) => {
            warn!(table = %T::TABLE, error = %e, "serving empty list");
            ApiResponse::with_warning(Vec::new(), format!("Could not load {}", T::TABLE))
        }
    }
}

pub async fn create<T: Entity>(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Created<T>, ApiError> {
    let Json(body) = payload?;
    let record = Record::from_value(body)
        .ok_or_else(|| ApiError::BadRequest("Request body must be a JSON object".to_string()))?;

    let created = state.store.insert_record::<T>(record).await?;
    debug!(table = %T::TABLE, "record created");
    Ok(Created(created))
}

pub async fn fetch<T: Entity>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<T> {
    state
        .store
        .get_entity::<T>(&id)
        .await?
        .map(ApiResponse::ok)
        .ok_or_else(|| ApiError::NotFound(format!("No {} record with id '{}'", T::TABLE, id)))
}

pub async fn update<T: Entity>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<T> {
    let Json(patch) = payload?;
    Ok(ApiResponse::ok(state.store.patch::<T>(&id, &patch).await?))
}

pub async fn remove<T: Entity>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<bool> {
    Ok(ApiResponse::ok(state.store.delete(T::TABLE, &id).await?))
}
