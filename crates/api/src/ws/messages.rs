//! JSON messages exchanged over the WebSocket.
//!
//! Inbound frames are `{ "action": ..., "payload": {...} }` envelopes.
//! Outbound frames are `{ "type": ..., "data": {...} }`, with the type names
//! defined in [`arttic_core::messages`].

use arttic_core::generation::DEFAULT_SAMPLER;
use arttic_core::messages::*;
use arttic_core::status::PipelineSnapshot;
use arttic_core::types::Timestamp;
use arttic_events::ProgressEvent;
use arttic_pipeline::{GenerationMetadata, OptimizeOutcome};
use arttic_worker::GalleryEntry;
use axum::extract::ws::Message;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// URL prefix under which generated images are served.
pub const OUTPUTS_URL_PREFIX: &str = "/outputs";

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Pipeline state as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusData {
    #[serde(flatten)]
    pub snapshot: PipelineSnapshot,
    pub status_text: String,
    /// Native resolution of the loaded family.
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl From<&PipelineSnapshot> for StatusData {
    fn from(snapshot: &PipelineSnapshot) -> Self {
        let resolution = snapshot.default_resolution();
        Self {
            snapshot: snapshot.clone(),
            status_text: snapshot.describe(),
            width: resolution.map(|(w, _)| w),
            height: resolution.map(|(_, h)| h),
        }
    }
}

/// A gallery image with its public URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalleryImage {
    pub filename: String,
    pub url: String,
    pub created_at: Timestamp,
}

impl From<GalleryEntry> for GalleryImage {
    fn from(entry: GalleryEntry) -> Self {
        Self {
            url: image_url(&entry.filename),
            filename: entry.filename,
            created_at: entry.created_at,
        }
    }
}

pub fn image_url(filename: &str) -> String {
    format!("{OUTPUTS_URL_PREFIX}/{filename}")
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    ProgressUpdate(ProgressEvent),
    ModelLoaded(StatusData),
    ModelUnloaded(StatusData),
    /// Current pipeline state, sent on connect and broadcast on changes.
    ModelStatus(StatusData),
    ModelOptimized {
        #[serde(flatten)]
        outcome: OptimizeOutcome,
        #[serde(flatten)]
        status: StatusData,
    },
    GenerationComplete {
        /// URL of the saved image.
        image: String,
        filename: String,
        /// One-line summary of the generation parameters.
        info: String,
        metadata: GenerationMetadata,
    },
    ImageDeleted {
        filename: String,
        deleted: bool,
    },
    GalleryUpdated {
        images: Vec<GalleryImage>,
    },
    Error {
        message: String,
        code: &'static str,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>, code: &'static str) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::ProgressUpdate(_) => MSG_TYPE_PROGRESS_UPDATE,
            ServerMessage::ModelLoaded(_) => MSG_TYPE_MODEL_LOADED,
            ServerMessage::ModelUnloaded(_) => MSG_TYPE_MODEL_UNLOADED,
            ServerMessage::ModelStatus(_) => MSG_TYPE_MODEL_STATUS,
            ServerMessage::ModelOptimized { .. } => MSG_TYPE_MODEL_OPTIMIZED,
            ServerMessage::GenerationComplete { .. } => MSG_TYPE_GENERATION_COMPLETE,
            ServerMessage::ImageDeleted { .. } => MSG_TYPE_IMAGE_DELETED,
            ServerMessage::GalleryUpdated { .. } => MSG_TYPE_GALLERY_UPDATED,
            ServerMessage::Error { .. } => MSG_TYPE_ERROR,
        }
    }

    /// Encode as a WebSocket text frame.
    pub fn to_message(&self) -> Message {
        match serde_json::to_string(self) {
            Ok(json) => Message::Text(json.into()),
            Err(e) => {
                tracing::error!(msg_type = self.type_name(), error = %e, "Failed to encode message");
                let fallback = ServerMessage::error("Failed to encode message", "INTERNAL_ERROR");
                Message::Text(
                    serde_json::to_string(&fallback)
                        .unwrap_or_default()
                        .into(),
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ClientEnvelope {
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ClientEnvelope {
    /// Decode the payload; a missing payload counts as `{}`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        let payload = match self.payload {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };
        serde_json::from_value(payload)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadModelPayload {
    pub model: String,
    #[serde(default = "default_sampler")]
    pub sampler: String,
    #[serde(default)]
    pub vae_tiling: bool,
    #[serde(default)]
    pub cpu_offload: bool,
    /// LoRA file stem, or `"None"`.
    #[serde(default)]
    pub lora: Option<String>,
}

fn default_sampler() -> String {
    DEFAULT_SAMPLER.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteImagePayload {
    pub filename: String,
}
