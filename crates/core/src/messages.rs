//! WebSocket message type and action name constants.
//!
//! Used by the session protocol handler when decoding client actions and
//! when tagging outbound messages.

// ---------------------------------------------------------------------------
// Inbound actions
// ---------------------------------------------------------------------------

pub const ACTION_LOAD_MODEL: &str = "load_model";
pub const ACTION_GENERATE_IMAGE: &str = "generate_image";
pub const ACTION_UNLOAD_MODEL: &str = "unload_model";
pub const ACTION_DELETE_IMAGE: &str = "delete_image";
pub const ACTION_OPTIMIZE_MODEL: &str = "optimize_model";

// ---------------------------------------------------------------------------
// Outbound message types
// ---------------------------------------------------------------------------

/// Progress of the requester's in-flight job.
pub const MSG_TYPE_PROGRESS_UPDATE: &str = "progress_update";

pub const MSG_TYPE_MODEL_LOADED: &str = "model_loaded";
pub const MSG_TYPE_MODEL_UNLOADED: &str = "model_unloaded";
pub const MSG_TYPE_GENERATION_COMPLETE: &str = "generation_complete";
pub const MSG_TYPE_IMAGE_DELETED: &str = "image_deleted";
pub const MSG_TYPE_MODEL_OPTIMIZED: &str = "model_optimized";

/// Broadcast to every connection when the gallery listing changes.
pub const MSG_TYPE_GALLERY_UPDATED: &str = "gallery_updated";

/// Broadcast to every connection when the pipeline status changes.
pub const MSG_TYPE_MODEL_STATUS: &str = "model_status";

/// Sent to the requester only.
pub const MSG_TYPE_ERROR: &str = "error";
