use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use status_relay::{IngestOutcome, MESSAGE_TYPE_HEADER};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::storage::{artifact_key, StorageError};
use crate::types::{HealthResponse, UploadResponse};

/// Multipart field carrying the uploaded artifact.
pub const UPLOAD_FIELD: &str = "file";

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Missing multipart field `file`")]
    MissingFile,

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Failed to store upload: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingFile => StatusCode::BAD_REQUEST,
            ApiError::Multipart(e) => e.status(),
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(serde_json::json!({
                "error": self.to_string()
            })),
        )
            .into_response()
    }
}

// ============================================================================
// Health Check
// ============================================================================

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        live_channels: state.registry.len().await,
    })
}

// ============================================================================
// Upload
// ============================================================================

async fn read_upload(multipart: &mut Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            return Ok(field.bytes().await?);
        }
    }
    Err(ApiError::MissingFile)
}

/// Stores the artifact, registers its status channel and announces it to
/// the worker. The channel exists before the identifier is handed out, so a
/// client that subscribes after this returns always finds it.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let artifact = read_upload(&mut multipart).await?;

    let channel = state.registry.register_fresh().await;
    let id = channel.id().clone();
    info!("📥 New image received: {} ({} bytes)", id, artifact.len());

    let key = artifact_key(&id);
    let location = match state.store.put(&key, &artifact).await {
        Ok(location) => location,
        Err(e) => {
            error!("❌ Failed to store {}: {}", key, e);
            state.registry.evict(&id).await;
            return Err(e.into());
        }
    };
    info!("✅ Stored upload at {}", location);

    match state
        .publisher
        .publish(&state.topics.new_image, &location)
        .await
    {
        Ok(message_id) => info!("📤 Announced {} to worker, message id {}", id, message_id),
        Err(e) => warn!("⚠️ Failed to announce {} to worker: {}", id, e),
    }

    Ok(Json(UploadResponse { image_id: id }))
}

// ============================================================================
// Status Webhook
// ============================================================================

/// Receives status reports from the worker's topic. Always answers `200`,
/// whatever happened to the payload.
pub async fn status_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let message_type = headers
        .get(MESSAGE_TYPE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state.ingest.ingest(message_type, &body).await;
    if let IngestOutcome::Malformed { reason } = &outcome {
        warn!("⚠️ Malformed webhook body acknowledged anyway: {}", reason);
    } else {
        debug!("Webhook outcome: {:?}", outcome);
    }

    StatusCode::OK
}
