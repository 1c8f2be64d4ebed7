//! The seam between pipeline lifecycle management and the inference library.
//!
//! Everything that touches weights or the accelerator goes through
//! [`InferenceBackend`]. The manager never inspects components or pipeline
//! wrappers itself; it only sequences backend calls and classifies their
//! failures.

use std::path::Path;

use arttic_core::capability::PipelineKind;
use arttic_core::model::{ModelDescriptor, Precision};
use image::RgbImage;
use serde::Serialize;

/// Errors reported by a backend, before classification by the manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("accelerator is not available")]
    Unavailable,

    #[error("repository '{repo}' is gated")]
    Gated { repo: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Failed(String),
}

/// Where the pipeline's compute runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Everything resident on the accelerator.
    Accelerator,
    /// Submodules stay in host memory and move to the accelerator on use.
    CpuOffload,
}

impl Placement {
    pub fn from_offload(offload: bool) -> Self {
        if offload {
            Placement::CpuOffload
        } else {
            Placement::Accelerator
        }
    }
}

/// Settings applied to every freshly assembled wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub sampler: String,
    pub vae_tiling: bool,
}

/// Compute submodules that can be optimized in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Submodule {
    Unet,
    Transformer,
    Vae,
}

/// Inputs to a single forward run.
#[derive(Debug, Clone)]
pub struct InferenceInput<'a> {
    pub prompt: &'a str,
    /// `None` when the model does not take negative prompts.
    pub negative_prompt: Option<&'a str>,
    pub steps: u32,
    pub guidance: f32,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    /// Blend weight of the loaded LoRA, if one is loaded.
    pub lora_weight: Option<f32>,
    pub init_image: Option<&'a RgbImage>,
    pub strength: f32,
}

/// An inference library capable of running diffusion pipelines.
///
/// Components (text encoders, denoiser, VAE) are opened once per load and
/// shared by every wrapper assembled from them, so a mode switch is a call
/// to [`assemble`](Self::assemble) rather than a reload.
pub trait InferenceBackend: Send + 'static {
    type Components: Send;
    type Pipeline: Send;

    fn name(&self) -> &'static str;

    fn accelerator_available(&self) -> bool;

    /// Open the base components described by `descriptor`.
    fn open_components(
        &mut self,
        descriptor: &ModelDescriptor,
        access_token: Option<&str>,
    ) -> Result<Self::Components, BackendError>;

    /// Overwrite component weights with the checkpoint at `weights`.
    fn inject_weights(
        &mut self,
        components: &mut Self::Components,
        weights: &Path,
    ) -> Result<(), BackendError>;

    /// Build a pipeline wrapper of `kind` around existing components.
    fn assemble(
        &mut self,
        kind: PipelineKind,
        components: &Self::Components,
    ) -> Result<Self::Pipeline, BackendError>;

    fn configure(
        &mut self,
        pipeline: &mut Self::Pipeline,
        options: &PipelineOptions,
    ) -> Result<(), BackendError>;

    fn place(
        &mut self,
        pipeline: &mut Self::Pipeline,
        placement: Placement,
    ) -> Result<(), BackendError>;

    fn load_lora(
        &mut self,
        components: &mut Self::Components,
        path: &Path,
    ) -> Result<(), BackendError>;

    fn has_submodule(&self, components: &Self::Components, submodule: Submodule) -> bool;

    /// Optimize one submodule in place for inference at `precision`.
    fn optimize(
        &mut self,
        components: &mut Self::Components,
        submodule: Submodule,
        precision: Precision,
    ) -> Result<(), BackendError>;

    /// Run the denoising loop, calling `on_step(step, total)` after each step.
    fn run(
        &mut self,
        pipeline: &mut Self::Pipeline,
        components: &Self::Components,
        input: &InferenceInput<'_>,
        on_step: &mut dyn FnMut(u32, u32),
    ) -> Result<RgbImage, BackendError>;

    fn release_pipeline(&mut self, pipeline: Self::Pipeline) {
        drop(pipeline);
    }

    fn release_components(&mut self, components: Self::Components) {
        drop(components);
    }
}
