use arttic_core::capability::Mode;

/// Failures of pipeline operations, classified at the backend boundary.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No accelerator device is available")]
    DeviceUnavailable,

    #[error(
        "Access to '{repo}' is restricted. Log in with an access token that has accepted the model license"
    )]
    AuthRequired { repo: String },

    #[error("Could not retrieve components from '{source_ref}': {reason}")]
    DownloadFailed { source_ref: String, reason: String },

    #[error("Failed to load model: {0}")]
    LoadFailed(String),

    #[error("Could not switch to {mode} mode: {reason}")]
    ModeSwitch { mode: Mode, reason: String },

    #[error("Failed to place pipeline on device: {0}")]
    Placement(String),

    #[error("Optimization failed: {0}")]
    Optimization(String),

    #[error("No model is loaded")]
    NotLoaded,

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl PipelineError {
    /// Stable machine-readable code, used in logs and error replies.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::DeviceUnavailable => "DEVICE_UNAVAILABLE",
            PipelineError::AuthRequired { .. } => "AUTH_REQUIRED",
            PipelineError::DownloadFailed { .. } => "DOWNLOAD_FAILED",
            PipelineError::LoadFailed(_) => "LOAD_FAILED",
            PipelineError::ModeSwitch { .. } => "MODE_SWITCH_ERROR",
            PipelineError::Placement(_) => "PLACEMENT_ERROR",
            PipelineError::Optimization(_) => "OPTIMIZATION_ERROR",
            PipelineError::NotLoaded => "NOT_LOADED",
            PipelineError::Generation(_) => "GENERATION_ERROR",
            PipelineError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}
