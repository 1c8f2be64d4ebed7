//! A deterministic CPU backend.
//!
//! [`SimulatedBackend`] behaves like a real inference library from the
//! manager's point of view: components are opened from the checkpoint on
//! disk (or a "remote" repository that may be gated), wrappers are
//! assembled around shared components, and runs report per-step progress.
//! Images are rendered procedurally from the prompt, seed and weights, so
//! identical inputs always produce identical pixels.
//!
//! A [`SimulatorProbe`] shared with the backend counts every call and lets
//! callers inject faults.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arttic_core::capability::{Mode, PipelineKind};
use arttic_core::model::{ComponentSource, ModelDescriptor, ModelFamily, Precision};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::backend::{
    BackendError, InferenceBackend, InferenceInput, Placement, PipelineOptions, Submodule,
};

// ---------------------------------------------------------------------------
// Configuration and probe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// When `false` the backend behaves as if no accelerator is present.
    pub accelerator: bool,
    /// Sleep between denoising steps, to make runs observable.
    pub step_delay: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            accelerator: true,
            step_delay: Duration::ZERO,
        }
    }
}

/// Call counters and fault switches shared between a backend and observers.
#[derive(Debug, Default)]
pub struct SimulatorProbe {
    components_opened: AtomicUsize,
    weights_injected: AtomicUsize,
    pipelines_assembled: AtomicUsize,
    pipelines_released: AtomicUsize,
    components_released: AtomicUsize,
    submodules_optimized: AtomicUsize,
    loras_loaded: AtomicUsize,
    runs: AtomicUsize,
    active_runs: AtomicUsize,
    max_concurrent_runs: AtomicUsize,
    fail_downloads: AtomicBool,
    fail_assembly: AtomicBool,
    fail_runs: AtomicBool,
    panic_next_run: AtomicBool,
}

impl SimulatorProbe {
    pub fn components_opened(&self) -> usize {
        self.components_opened.load(Ordering::SeqCst)
    }

    pub fn weights_injected(&self) -> usize {
        self.weights_injected.load(Ordering::SeqCst)
    }

    pub fn pipelines_assembled(&self) -> usize {
        self.pipelines_assembled.load(Ordering::SeqCst)
    }

    pub fn pipelines_released(&self) -> usize {
        self.pipelines_released.load(Ordering::SeqCst)
    }

    pub fn components_released(&self) -> usize {
        self.components_released.load(Ordering::SeqCst)
    }

    pub fn submodules_optimized(&self) -> usize {
        self.submodules_optimized.load(Ordering::SeqCst)
    }

    pub fn loras_loaded(&self) -> usize {
        self.loras_loaded.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Highest number of runs ever observed in flight at the same time.
    pub fn max_concurrent_runs(&self) -> usize {
        self.max_concurrent_runs.load(Ordering::SeqCst)
    }

    /// Make remote component downloads fail with a network error.
    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    /// Make every wrapper assembly fail.
    pub fn fail_assembly(&self, fail: bool) {
        self.fail_assembly.store(fail, Ordering::SeqCst);
    }

    /// Make runs fail halfway through the denoising loop.
    pub fn fail_runs(&self, fail: bool) {
        self.fail_runs.store(fail, Ordering::SeqCst);
    }

    /// Make the next run panic, as a crashing native library would.
    pub fn panic_next_run(&self) {
        self.panic_next_run.store(true, Ordering::SeqCst);
    }
}

/// Decrements the in-flight run counter however a run exits.
struct ActiveRun<'a>(&'a AtomicUsize);

impl<'a> ActiveRun<'a> {
    fn enter(probe: &'a SimulatorProbe) -> Self {
        let active = probe.active_runs.fetch_add(1, Ordering::SeqCst) + 1;
        probe.max_concurrent_runs.fetch_max(active, Ordering::SeqCst);
        Self(&probe.active_runs)
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Components and pipelines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimModule {
    kind: Submodule,
    optimized_at: Option<Precision>,
}

impl SimModule {
    fn new(kind: Submodule) -> Self {
        Self {
            kind,
            optimized_at: None,
        }
    }
}

#[derive(Debug)]
pub struct SimComponents {
    family: ModelFamily,
    denoiser: SimModule,
    vae: SimModule,
    /// Base colour derived from the weights that were loaded.
    palette: [u8; 3],
    lora: Option<String>,
}

impl SimComponents {
    fn module_mut(&mut self, submodule: Submodule) -> Option<&mut SimModule> {
        match submodule {
            Submodule::Vae => Some(&mut self.vae),
            kind if self.denoiser.kind == kind => Some(&mut self.denoiser),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct SimPipeline {
    kind: PipelineKind,
    placement: Option<Placement>,
    sampler: String,
    vae_tiling: bool,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub struct SimulatedBackend {
    config: SimulatorConfig,
    probe: Arc<SimulatorProbe>,
}

impl SimulatedBackend {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            probe: Arc::new(SimulatorProbe::default()),
        }
    }

    /// Shared handle to this backend's counters and fault switches.
    pub fn probe(&self) -> Arc<SimulatorProbe> {
        Arc::clone(&self.probe)
    }

    fn require_accelerator(&self) -> Result<(), BackendError> {
        if self.config.accelerator {
            Ok(())
        } else {
            Err(BackendError::Unavailable)
        }
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

fn file_fingerprint(path: &Path) -> Result<u64, BackendError> {
    let meta = std::fs::metadata(path)
        .map_err(|e| BackendError::Io(format!("{}: {e}", path.display())))?;
    if !meta.is_file() {
        return Err(BackendError::Io(format!("{} is not a file", path.display())));
    }
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    Ok(fnv1a(name.as_bytes(), meta.len()))
}

impl InferenceBackend for SimulatedBackend {
    type Components = SimComponents;
    type Pipeline = SimPipeline;

    fn name(&self) -> &'static str {
        "simulated"
    }

    fn accelerator_available(&self) -> bool {
        self.config.accelerator
    }

    fn open_components(
        &mut self,
        descriptor: &ModelDescriptor,
        access_token: Option<&str>,
    ) -> Result<SimComponents, BackendError> {
        self.require_accelerator()?;

        let fingerprint = match &descriptor.source {
            ComponentSource::SingleFile { path } => file_fingerprint(path)?,
            ComponentSource::Remote { repo, .. } => {
                if self.probe.fail_downloads.load(Ordering::SeqCst) {
                    return Err(BackendError::Network(format!(
                        "connection reset while fetching {repo}"
                    )));
                }
                if let Some(gated) = descriptor.gated_repo() {
                    if access_token.is_none_or(str::is_empty) {
                        return Err(BackendError::Gated {
                            repo: gated.to_string(),
                        });
                    }
                }
                fnv1a(repo.as_bytes(), 0)
            }
        };

        let denoiser = match descriptor.family {
            ModelFamily::Sd3 | ModelFamily::Flux => Submodule::Transformer,
            ModelFamily::Sd15 | ModelFamily::Sd2 | ModelFamily::Sdxl => Submodule::Unet,
        };

        self.probe.components_opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(model = %descriptor.id, family = %descriptor.family, "Opened components");

        Ok(SimComponents {
            family: descriptor.family,
            denoiser: SimModule::new(denoiser),
            vae: SimModule::new(Submodule::Vae),
            palette: palette(fingerprint),
            lora: None,
        })
    }

    fn inject_weights(
        &mut self,
        components: &mut SimComponents,
        weights: &Path,
    ) -> Result<(), BackendError> {
        let fingerprint = file_fingerprint(weights)?;
        let delta = palette(fingerprint);
        for (c, d) in components.palette.iter_mut().zip(delta) {
            *c = c.wrapping_add(d) / 2 + d / 2;
        }
        self.probe.weights_injected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn assemble(
        &mut self,
        kind: PipelineKind,
        components: &SimComponents,
    ) -> Result<SimPipeline, BackendError> {
        if self.probe.fail_assembly.load(Ordering::SeqCst) {
            return Err(BackendError::Failed(format!("could not assemble {kind:?}")));
        }
        if kind.has_transformer() != (components.denoiser.kind == Submodule::Transformer) {
            return Err(BackendError::Failed(format!(
                "{kind:?} is incompatible with {} components",
                components.family
            )));
        }
        self.probe.pipelines_assembled.fetch_add(1, Ordering::SeqCst);
        Ok(SimPipeline {
            kind,
            placement: None,
            sampler: String::new(),
            vae_tiling: false,
        })
    }

    fn configure(
        &mut self,
        pipeline: &mut SimPipeline,
        options: &PipelineOptions,
    ) -> Result<(), BackendError> {
        pipeline.sampler = options.sampler.clone();
        pipeline.vae_tiling = options.vae_tiling;
        Ok(())
    }

    fn place(
        &mut self,
        pipeline: &mut SimPipeline,
        placement: Placement,
    ) -> Result<(), BackendError> {
        self.require_accelerator()?;
        pipeline.placement = Some(placement);
        Ok(())
    }

    fn load_lora(
        &mut self,
        components: &mut SimComponents,
        path: &Path,
    ) -> Result<(), BackendError> {
        file_fingerprint(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        components.lora = Some(name);
        self.probe.loras_loaded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn has_submodule(&self, components: &SimComponents, submodule: Submodule) -> bool {
        submodule == Submodule::Vae || components.denoiser.kind == submodule
    }

    fn optimize(
        &mut self,
        components: &mut SimComponents,
        submodule: Submodule,
        precision: Precision,
    ) -> Result<(), BackendError> {
        self.require_accelerator()?;
        let module = components
            .module_mut(submodule)
            .ok_or_else(|| BackendError::Failed(format!("no {submodule:?} to optimize")))?;
        module.optimized_at = Some(precision);
        self.probe.submodules_optimized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn run(
        &mut self,
        pipeline: &mut SimPipeline,
        components: &SimComponents,
        input: &InferenceInput<'_>,
        on_step: &mut dyn FnMut(u32, u32),
    ) -> Result<RgbImage, BackendError> {
        let _active = ActiveRun::enter(&self.probe);
        self.probe.runs.fetch_add(1, Ordering::SeqCst);

        if self.probe.panic_next_run.swap(false, Ordering::SeqCst) {
            panic!("simulated backend crashed during {:?}", pipeline.kind);
        }
        if pipeline.placement.is_none() {
            return Err(BackendError::Failed(
                "pipeline has not been placed on a device".to_string(),
            ));
        }
        let wants_init = pipeline.kind.mode() == Mode::ImageToImage;
        if wants_init != input.init_image.is_some() {
            return Err(BackendError::Failed(format!(
                "{:?} pipeline received mismatched init image",
                pipeline.kind
            )));
        }

        tracing::trace!(
            kind = ?pipeline.kind,
            sampler = %pipeline.sampler,
            vae_tiling = pipeline.vae_tiling,
            optimized = components.denoiser.optimized_at.is_some(),
            "Running pipeline"
        );
        let total = input.steps.max(1);
        let fail_at = self
            .probe
            .fail_runs
            .load(Ordering::SeqCst)
            .then(|| total.div_ceil(2));
        for step in 1..=total {
            if !self.config.step_delay.is_zero() {
                std::thread::sleep(self.config.step_delay);
            }
            if fail_at == Some(step) {
                return Err(BackendError::Failed(format!(
                    "numerical instability at step {step}"
                )));
            }
            on_step(step, total);
        }

        Ok(render(pipeline, components, input))
    }

    fn release_pipeline(&mut self, pipeline: SimPipeline) {
        tracing::trace!(kind = ?pipeline.kind, "Released pipeline");
        self.probe.pipelines_released.fetch_add(1, Ordering::SeqCst);
    }

    fn release_components(&mut self, components: SimComponents) {
        tracing::trace!(family = %components.family, "Released components");
        self.probe.components_released.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn fnv1a(bytes: &[u8], salt: u64) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ salt;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn palette(hash: u64) -> [u8; 3] {
    [hash as u8, (hash >> 8) as u8, (hash >> 16) as u8]
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    (f32::from(a) + (f32::from(b) - f32::from(a)) * t.clamp(0.0, 1.0)).round() as u8
}

fn render(pipeline: &SimPipeline, components: &SimComponents, input: &InferenceInput<'_>) -> RgbImage {
    let mut hash = fnv1a(input.prompt.as_bytes(), input.seed);
    if let Some(negative) = input.negative_prompt {
        hash = fnv1a(negative.as_bytes(), hash);
    }
    hash = fnv1a(pipeline.sampler.as_bytes(), hash);
    hash = fnv1a(&input.steps.to_le_bytes(), hash);
    hash = fnv1a(&input.guidance.to_bits().to_le_bytes(), hash);

    let base = components.palette;
    let accent = palette(hash);
    let tint = palette(hash.rotate_left(24));
    let tint_weight = match (&components.lora, input.lora_weight) {
        (Some(_), Some(weight)) => weight * 0.5,
        _ => 0.0,
    };

    let (w, h) = (input.width.max(1), input.height.max(1));
    let mut image = RgbImage::from_fn(w, h, |x, y| {
        let fx = x as f32 / w as f32;
        let fy = y as f32 / h as f32;
        let px = [
            lerp(base[0], accent[0], fx),
            lerp(base[1], accent[1], fy),
            lerp(base[2], accent[2], (fx + fy) / 2.0),
        ];
        Rgb([
            lerp(px[0], tint[0], tint_weight),
            lerp(px[1], tint[1], tint_weight),
            lerp(px[2], tint[2], tint_weight),
        ])
    });

    if let Some(init) = input.init_image {
        let init = imageops::resize(init, w, h, FilterType::Triangle);
        for (out, src) in image.pixels_mut().zip(init.pixels()) {
            for c in 0..3 {
                out.0[c] = lerp(src.0[c], out.0[c], input.strength);
            }
        }
    }

    image
}
