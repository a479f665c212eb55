//! Attachment upload, lookup and removal
//!
//! Uploads arrive as JSON with base64 content rather than multipart.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use roost_core::{BlobContent, UploadedFile};

use crate::response::{ApiError, ApiResponse, ApiResult, Created};
use crate::AppState;

/// Prefix of the lookup route under the files catch-all
const URL_PREFIX: &str = "url/";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Original file name; drives the key and content type
    pub name: String,
    /// Optional folder the key is placed under
    #[serde(default)]
    pub folder: Option<String>,
    /// Base64-encoded file content
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileUrl {
    pub key: String,
    pub url: String,
}

pub async fn upload(
    State(state): State<AppState>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Created<UploadedFile>, ApiError> {
    let Json(req) = payload?;
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("File name is required".to_string()));
    }

    let content = base64::engine::general_purpose::STANDARD
        .decode(req.content.trim())
        .map_err(|e| ApiError::BadRequest(format!("Invalid base64: {}", e)))?;
    let size = content.len();

    let uploaded = state
        .blobs
        .upload_file(BlobContent::from(content), &req.name, req.folder.as_deref())
        .await?;

    debug!(key = %uploaded.key, size, provider = %uploaded.provider, "file uploaded");
    Ok(Created(uploaded))
}

/// `GET /api/files/url/*key`
pub async fn url(State(state): State<AppState>, Path(path): Path<String>) -> ApiResult<FileUrl> {
    let key = path
        .strip_prefix(URL_PREFIX)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ApiError::NotFound("Route not found".to_string()))?;

    let url = state.blobs.get_file_url(key)?;
    Ok(ApiResponse::ok(FileUrl {
        key: key.to_string(),
        url,
    }))
}

/// `DELETE /api/files/*key`
pub async fn delete(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<bool> {
    state.blobs.delete_file(&key).await?;
    Ok(ApiResponse::ok(true))
}
