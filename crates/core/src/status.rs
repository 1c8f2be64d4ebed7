//! Read-only view of the pipeline lifecycle state.
//!
//! The live state is owned by the worker. Everything outside the worker
//! sees only [`PipelineSnapshot`] values published after each job.

use serde::{Deserialize, Serialize};

use crate::capability::Mode;
use crate::model::ModelFamily;
use crate::resolution::default_resolution;

/// Lifecycle status of the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

/// Serializable copy of the pipeline state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub status: PipelineStatus,
    pub model: Option<String>,
    pub family: Option<ModelFamily>,
    pub mode: Option<Mode>,
    pub offloaded: bool,
    pub optimized: bool,
    pub sampler: Option<String>,
    pub lora: Option<String>,
}

impl PipelineSnapshot {
    pub fn is_loaded(&self) -> bool {
        self.status == PipelineStatus::Loaded
    }

    /// Native resolution of the loaded family, if any.
    pub fn default_resolution(&self) -> Option<(u32, u32)> {
        self.family.map(default_resolution)
    }

    /// One-line status text for display.
    pub fn describe(&self) -> String {
        match (&self.status, &self.model, self.family) {
            (PipelineStatus::Loaded, Some(model), Some(family)) => {
                let placement = if self.offloaded { "CPU offload" } else { "accelerator" };
                format!("Ready: {model} ({family}) on {placement}")
            }
            _ => "No model loaded.".to_string(),
        }
    }
}
