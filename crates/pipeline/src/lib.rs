//! Pipeline lifecycle management.
//!
//! [`PipelineManager`] owns the single loaded pipeline and exposes
//! load/unload/mode-switch/placement/optimize/generate as atomic state
//! transitions. The numerical work is delegated to an [`InferenceBackend`];
//! [`SimulatedBackend`] is a CPU implementation used by the default build
//! and by tests.

pub mod backend;
pub mod error;
pub mod manager;
pub mod simulated;

pub use backend::{BackendError, InferenceBackend, InferenceInput, Placement, PipelineOptions, Submodule};
pub use error::PipelineError;
pub use manager::{
    GeneratedImage, GenerationMetadata, LoadOptions, ModeChange, OptimizeOutcome, PipelineManager,
};
pub use simulated::{SimulatedBackend, SimulatorConfig, SimulatorProbe};
