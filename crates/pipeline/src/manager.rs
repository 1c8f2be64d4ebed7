//! Single-pipeline lifecycle state machine.
//!
//! ```text
//! Unloaded --load--> Loading --ok--> Loaded --unload--> Unloading --> Unloaded
//!                       \--fail--> Unloaded
//! ```
//!
//! `ensure_mode`, `place_on_device`, `optimize` and `generate` are
//! self-transitions of `Loaded`. Every operation either completes or leaves
//! the previous state in place; a failed load always ends in `Unloaded`
//! with everything it acquired released.

use std::time::Instant;

use arttic_core::capability::{CapabilityTable, Mode, PipelineKind};
use arttic_core::generation::{GenerationRequest, DEFAULT_SAMPLER};
use arttic_core::model::{ComponentSource, LoraRef, ModelDescriptor, ModelFamily};
use arttic_core::status::{PipelineSnapshot, PipelineStatus};
use arttic_events::ProgressSink;
use image::RgbImage;
use serde::Serialize;

use crate::backend::{
    BackendError, InferenceBackend, InferenceInput, Placement, PipelineOptions, Submodule,
};
use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options chosen by the client when loading a model.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub sampler: String,
    pub vae_tiling: bool,
    pub cpu_offload: bool,
    pub lora: Option<LoraRef>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            sampler: DEFAULT_SAMPLER.to_string(),
            vae_tiling: false,
            cpu_offload: false,
            lora: None,
        }
    }
}

/// Result of [`PipelineManager::ensure_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    /// Already in the requested mode, or nothing is loaded.
    Unchanged,
    Switched { from: Mode, to: Mode },
    /// The loaded family has no wrapper for the requested mode.
    Unsupported,
}

/// Result of [`PipelineManager::optimize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OptimizeOutcome {
    Optimized { submodules: Vec<Submodule> },
    AlreadyOptimized,
    /// Offloaded pipelines cannot be optimized in place.
    SkippedOffloaded,
}

/// Parameters an image was generated with, as stored alongside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationMetadata {
    pub model: String,
    pub family: ModelFamily,
    pub mode: Mode,
    pub sampler: String,
    pub prompt: String,
    /// The negative prompt actually used; empty when the model ignores it.
    pub negative_prompt: String,
    pub steps: u32,
    pub guidance: f32,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f32>,
    pub duration_secs: f64,
}

impl GenerationMetadata {
    /// Short human-readable summary, e.g. for a status line.
    pub fn summary(&self) -> String {
        format!(
            "Seed: {} | {} steps | CFG {:.1} | {}x{} | {} | {:.1}s",
            self.seed, self.steps, self.guidance, self.width, self.height, self.mode, self.duration_secs
        )
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image: RgbImage,
    pub metadata: GenerationMetadata,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct Loaded<B: InferenceBackend> {
    descriptor: ModelDescriptor,
    options: LoadOptions,
    components: B::Components,
    pipeline: B::Pipeline,
    kind: PipelineKind,
    offloaded: bool,
    optimized: bool,
}

/// Owner of the one loaded pipeline.
///
/// Not `Sync` by intent of use: exactly one instance exists and it is moved
/// into the job executor's worker thread.
pub struct PipelineManager<B: InferenceBackend> {
    backend: B,
    capabilities: CapabilityTable,
    access_token: Option<String>,
    status: PipelineStatus,
    loaded: Option<Loaded<B>>,
}

impl<B: InferenceBackend> PipelineManager<B> {
    /// `access_token` grants access to gated component repositories.
    pub fn new(backend: B, access_token: Option<String>) -> Self {
        Self {
            backend,
            capabilities: CapabilityTable,
            access_token: access_token.filter(|t| !t.trim().is_empty()),
            status: PipelineStatus::Unloaded,
            loaded: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn mode(&self) -> Option<Mode> {
        self.loaded.as_ref().map(|l| l.kind.mode())
    }

    pub fn descriptor(&self) -> Option<&ModelDescriptor> {
        self.loaded.as_ref().map(|l| &l.descriptor)
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        match &self.loaded {
            Some(loaded) => PipelineSnapshot {
                status: self.status,
                model: Some(loaded.descriptor.id.clone()),
                family: Some(loaded.descriptor.family),
                mode: Some(loaded.kind.mode()),
                offloaded: loaded.offloaded,
                optimized: loaded.optimized,
                sampler: Some(loaded.options.sampler.clone()),
                lora: loaded.options.lora.as_ref().map(|l| l.id.clone()),
            },
            None => PipelineSnapshot {
                status: self.status,
                ..Default::default()
            },
        }
    }

    // -- load / unload ------------------------------------------------------

    /// Load `descriptor`, replacing whatever is loaded.
    pub fn load(
        &mut self,
        descriptor: ModelDescriptor,
        options: LoadOptions,
        progress: &ProgressSink,
    ) -> Result<PipelineSnapshot, PipelineError> {
        progress.report(0.0, format!("Loading {}...", descriptor.id));
        self.unload();

        if !self.backend.accelerator_available() {
            tracing::error!(model = %descriptor.id, backend = self.backend.name(), "No accelerator available");
            return Err(PipelineError::DeviceUnavailable);
        }

        tracing::info!(
            model = %descriptor.id,
            family = %descriptor.family,
            sampler = %options.sampler,
            cpu_offload = options.cpu_offload,
            "Loading model"
        );
        let model_id = descriptor.id.clone();
        self.status = PipelineStatus::Loading;

        match self.build(descriptor, options, progress) {
            Ok(loaded) => {
                self.loaded = Some(loaded);
                self.status = PipelineStatus::Loaded;
                progress.report(1.0, format!("{model_id} ready"));
                tracing::info!(model = %model_id, "Model loaded");
                Ok(self.snapshot())
            }
            Err(e) => {
                self.status = PipelineStatus::Unloaded;
                tracing::warn!(model = %model_id, error = %e, "Model load failed");
                Err(e)
            }
        }
    }

    fn build(
        &mut self,
        descriptor: ModelDescriptor,
        options: LoadOptions,
        progress: &ProgressSink,
    ) -> Result<Loaded<B>, PipelineError> {
        progress.report(0.2, format!("Loading {} components...", descriptor.family));
        let mut components = self
            .backend
            .open_components(&descriptor, self.access_token.as_deref())
            .map_err(|e| classify_retrieval(source_ref(&descriptor), e))?;

        if descriptor.injects_weights() {
            progress.report(0.5, format!("Injecting weights from {}...", descriptor.id));
            if let Err(e) = self
                .backend
                .inject_weights(&mut components, &descriptor.weights_path)
            {
                self.backend.release_components(components);
                return Err(classify_retrieval(
                    descriptor.weights_path.display().to_string(),
                    e,
                ));
            }
        } else {
            progress.report(0.5, "Checkpoint weights loaded");
        }

        let mode = self.capabilities.default_mode(descriptor.family);
        let Some(kind) = self.capabilities.lookup(descriptor.family, mode) else {
            self.backend.release_components(components);
            return Err(PipelineError::LoadFailed(format!(
                "{} has no {mode} pipeline",
                descriptor.family
            )));
        };

        if options.vae_tiling && !descriptor.supports_vae_tiling() {
            tracing::info!(model = %descriptor.id, "VAE tiling is not available for this family, ignoring");
        }
        let placement = Placement::from_offload(options.cpu_offload);
        progress.report(
            0.7,
            match placement {
                Placement::CpuOffload => "Enabling CPU offload...",
                Placement::Accelerator => "Moving pipeline to accelerator...",
            },
        );
        let pipeline = match assemble_wrapper(
            &mut self.backend,
            kind,
            &components,
            &wrapper_options(&descriptor, &options),
            placement,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.backend.release_components(components);
                return Err(classify_load(e));
            }
        };

        let mut loaded = Loaded {
            descriptor,
            options,
            components,
            pipeline,
            kind,
            offloaded: placement == Placement::CpuOffload,
            optimized: false,
        };

        match self.finish(&mut loaded, progress) {
            Ok(()) => Ok(loaded),
            Err(e) => {
                self.release(loaded);
                Err(e)
            }
        }
    }

    fn finish(&mut self, loaded: &mut Loaded<B>, progress: &ProgressSink) -> Result<(), PipelineError> {
        if loaded.offloaded {
            tracing::info!(model = %loaded.descriptor.id, "Pipeline is offloaded, skipping optimization");
        } else {
            progress.report(0.8, "Optimizing for accelerator...");
            optimize_components(&mut self.backend, loaded)?;
        }

        if let Some(lora) = &loaded.options.lora {
            progress.report(0.9, format!("Loading LoRA {}...", lora.id));
            self.backend
                .load_lora(&mut loaded.components, &lora.path)
                .map_err(classify_load)?;
            tracing::info!(model = %loaded.descriptor.id, lora = %lora.id, "LoRA loaded");
        }
        Ok(())
    }

    fn release(&mut self, loaded: Loaded<B>) {
        self.backend.release_pipeline(loaded.pipeline);
        self.backend.release_components(loaded.components);
    }

    /// Release the loaded pipeline, if any. Returns whether anything was
    /// released.
    pub fn unload(&mut self) -> bool {
        let Some(loaded) = self.loaded.take() else {
            self.status = PipelineStatus::Unloaded;
            return false;
        };
        self.status = PipelineStatus::Unloading;
        tracing::info!(model = %loaded.descriptor.id, "Unloading model");
        self.release(loaded);
        self.status = PipelineStatus::Unloaded;
        true
    }

    // -- loaded self-transitions --------------------------------------------

    /// Switch the wrapper to `mode`, reusing the loaded components.
    ///
    /// On failure the previous wrapper and mode stay active.
    pub fn ensure_mode(&mut self, mode: Mode) -> Result<ModeChange, PipelineError> {
        let Some(loaded) = self.loaded.as_mut() else {
            return Ok(ModeChange::Unchanged);
        };
        let current = loaded.kind.mode();
        if current == mode {
            return Ok(ModeChange::Unchanged);
        }

        let Some(kind) = self.capabilities.lookup(loaded.descriptor.family, mode) else {
            tracing::warn!(
                model = %loaded.descriptor.id,
                family = %loaded.descriptor.family,
                %mode,
                "Mode not supported by model family"
            );
            return Ok(ModeChange::Unsupported);
        };

        let pipeline = assemble_wrapper(
            &mut self.backend,
            kind,
            &loaded.components,
            &wrapper_options(&loaded.descriptor, &loaded.options),
            Placement::from_offload(loaded.offloaded),
        )
        .map_err(|e| PipelineError::ModeSwitch {
            mode,
            reason: e.to_string(),
        })?;

        let previous = std::mem::replace(&mut loaded.pipeline, pipeline);
        loaded.kind = kind;
        self.backend.release_pipeline(previous);

        tracing::info!(model = %loaded.descriptor.id, from = %current, to = %mode, "Switched pipeline mode");
        Ok(ModeChange::Switched {
            from: current,
            to: mode,
        })
    }

    pub fn place_on_device(&mut self, offload: bool) -> Result<(), PipelineError> {
        let loaded = self.loaded.as_mut().ok_or(PipelineError::NotLoaded)?;
        if loaded.offloaded == offload {
            return Ok(());
        }
        self.backend
            .place(&mut loaded.pipeline, Placement::from_offload(offload))
            .map_err(|e| match e {
                BackendError::Unavailable => PipelineError::DeviceUnavailable,
                other => PipelineError::Placement(other.to_string()),
            })?;
        loaded.offloaded = offload;
        tracing::info!(model = %loaded.descriptor.id, offload, "Pipeline placement changed");
        Ok(())
    }

    pub fn optimize(&mut self, progress: &ProgressSink) -> Result<OptimizeOutcome, PipelineError> {
        let loaded = self.loaded.as_mut().ok_or(PipelineError::NotLoaded)?;
        if loaded.optimized {
            return Ok(OptimizeOutcome::AlreadyOptimized);
        }
        if loaded.offloaded {
            tracing::warn!(model = %loaded.descriptor.id, "Optimization unavailable while CPU offload is enabled");
            return Ok(OptimizeOutcome::SkippedOffloaded);
        }

        progress.report(0.0, "Optimizing for accelerator...");
        let submodules = optimize_components(&mut self.backend, loaded)?;
        progress.report(1.0, "Optimization complete");
        Ok(OptimizeOutcome::Optimized { submodules })
    }

    /// Run one generation. The mode follows from `init_image`.
    ///
    /// `request` must carry a resolved seed.
    pub fn generate(
        &mut self,
        request: &GenerationRequest,
        init_image: Option<&RgbImage>,
        progress: &ProgressSink,
    ) -> Result<GeneratedImage, PipelineError> {
        if self.loaded.is_none() {
            return Err(PipelineError::NotLoaded);
        }
        let seed = request.resolved_seed().ok_or_else(|| {
            PipelineError::InvalidRequest("seed must be resolved before generation".to_string())
        })?;

        let mode = if init_image.is_some() {
            Mode::ImageToImage
        } else {
            Mode::TextToImage
        };
        if self.ensure_mode(mode)? == ModeChange::Unsupported {
            let family = self.descriptor().map(|d| d.family.label()).unwrap_or_default();
            return Err(PipelineError::ModeSwitch {
                mode,
                reason: format!("{family} models do not support {mode}"),
            });
        }
        let loaded = self.loaded.as_mut().ok_or(PipelineError::NotLoaded)?;

        let negative_prompt = if loaded.descriptor.supports_negative_prompt() {
            request.negative_prompt.trim()
        } else {
            if !request.negative_prompt.trim().is_empty() {
                tracing::info!(model = %loaded.descriptor.id, "Negative prompt is not supported by this model, ignoring");
            }
            ""
        };
        let lora_weight = loaded.options.lora.as_ref().map(|_| request.lora_weight);

        let input = InferenceInput {
            prompt: &request.prompt,
            negative_prompt: (!negative_prompt.is_empty()).then_some(negative_prompt),
            steps: request.steps,
            guidance: request.guidance,
            seed,
            width: request.width,
            height: request.height,
            lora_weight,
            init_image,
            strength: request.strength,
        };

        tracing::info!(
            model = %loaded.descriptor.id,
            %mode,
            steps = request.steps,
            seed,
            width = request.width,
            height = request.height,
            "Generating image"
        );
        progress.report(0.0, "Starting generation...");
        let started = Instant::now();
        let image = self
            .backend
            .run(
                &mut loaded.pipeline,
                &loaded.components,
                &input,
                &mut |step, total| {
                    progress.report(step as f32 / total as f32, format!("Step {step}/{total}"));
                },
            )
            .map_err(|e| {
                tracing::error!(model = %loaded.descriptor.id, error = %e, "Generation failed");
                PipelineError::Generation(e.to_string())
            })?;
        let elapsed = started.elapsed();

        let metadata = GenerationMetadata {
            model: loaded.descriptor.id.clone(),
            family: loaded.descriptor.family,
            mode,
            sampler: loaded.options.sampler.clone(),
            prompt: request.prompt.clone(),
            negative_prompt: negative_prompt.to_string(),
            steps: request.steps,
            guidance: request.guidance,
            seed,
            width: image.width(),
            height: image.height(),
            lora: loaded.options.lora.as_ref().map(|l| l.id.clone()),
            lora_weight,
            init_image: request.init_image.clone().filter(|_| init_image.is_some()),
            strength: init_image.map(|_| request.strength),
            duration_secs: elapsed.as_secs_f64(),
        };
        tracing::info!(model = %metadata.model, seed, elapsed_ms = elapsed.as_millis() as u64, "Generation complete");

        Ok(GeneratedImage { image, metadata })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn wrapper_options(descriptor: &ModelDescriptor, options: &LoadOptions) -> PipelineOptions {
    PipelineOptions {
        sampler: options.sampler.clone(),
        vae_tiling: options.vae_tiling && descriptor.supports_vae_tiling(),
    }
}

/// Assemble, configure and place a wrapper; releases it again on failure.
fn assemble_wrapper<B: InferenceBackend>(
    backend: &mut B,
    kind: PipelineKind,
    components: &B::Components,
    options: &PipelineOptions,
    placement: Placement,
) -> Result<B::Pipeline, BackendError> {
    let mut pipeline = backend.assemble(kind, components)?;
    let ready = backend
        .configure(&mut pipeline, options)
        .and_then(|()| backend.place(&mut pipeline, placement));
    match ready {
        Ok(()) => Ok(pipeline),
        Err(e) => {
            backend.release_pipeline(pipeline);
            Err(e)
        }
    }
}

/// Optimize the denoiser (UNet or transformer) and the VAE in place.
fn optimize_components<B: InferenceBackend>(
    backend: &mut B,
    loaded: &mut Loaded<B>,
) -> Result<Vec<Submodule>, PipelineError> {
    let denoiser = [Submodule::Unet, Submodule::Transformer]
        .into_iter()
        .find(|s| backend.has_submodule(&loaded.components, *s));
    let vae = backend
        .has_submodule(&loaded.components, Submodule::Vae)
        .then_some(Submodule::Vae);
    let targets: Vec<Submodule> = denoiser.into_iter().chain(vae).collect();

    for submodule in &targets {
        backend
            .optimize(&mut loaded.components, *submodule, loaded.descriptor.precision)
            .map_err(|e| match e {
                BackendError::Unavailable => PipelineError::DeviceUnavailable,
                other => PipelineError::Optimization(other.to_string()),
            })?;
    }
    loaded.optimized = true;
    tracing::info!(model = %loaded.descriptor.id, ?targets, "Optimized pipeline");
    Ok(targets)
}

fn source_ref(descriptor: &ModelDescriptor) -> String {
    match &descriptor.source {
        ComponentSource::SingleFile { path } => path.display().to_string(),
        ComponentSource::Remote { repo, .. } => repo.clone(),
    }
}

/// Classify failures while retrieving components or weights.
fn classify_retrieval(source_ref: String, err: BackendError) -> PipelineError {
    match err {
        BackendError::Unavailable => PipelineError::DeviceUnavailable,
        BackendError::Gated { repo } => PipelineError::AuthRequired { repo },
        BackendError::Network(reason) | BackendError::Io(reason) => {
            PipelineError::DownloadFailed { source_ref, reason }
        }
        BackendError::Failed(reason) => PipelineError::LoadFailed(reason),
    }
}

/// Classify failures after the components are in memory.
fn classify_load(err: BackendError) -> PipelineError {
    match err {
        BackendError::Unavailable => PipelineError::DeviceUnavailable,
        BackendError::Gated { repo } => PipelineError::AuthRequired { repo },
        other => PipelineError::LoadFailed(other.to_string()),
    }
}
