use serde::{Deserialize, Serialize};
use status_relay::{ImageId, StatusValue};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(rename = "imageID")]
    pub image_id: ImageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub live_channels: usize,
}

// ============================================================================
// WebSocket Frames
// ============================================================================

/// One pushed status update, `{"status": "<value>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFrame {
    pub status: StatusValue,
}
