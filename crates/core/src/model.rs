//! Model families, descriptors, and identifier resolution.
//!
//! A [`ModelDescriptor`] is everything the pipeline needs to know before it
//! touches the accelerator: which family the weights belong to, where the
//! base components come from, and at which precision to run. Resolving a
//! descriptor has no side effects beyond checking that the weights file
//! exists.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// File extension of model and LoRA weight files.
pub const WEIGHTS_EXTENSION: &str = "safetensors";

/// Base components for Stable Diffusion 3 checkpoints.
pub const SD3_BASE_REPO: &str = "stabilityai/stable-diffusion-3-medium-diffusers";
/// Base components for FLUX.1 dev checkpoints (license-gated).
pub const FLUX_DEV_BASE_REPO: &str = "black-forest-labs/FLUX.1-dev";
/// Base components for FLUX.1 schnell checkpoints.
pub const FLUX_SCHNELL_BASE_REPO: &str = "black-forest-labs/FLUX.1-schnell";

// ---------------------------------------------------------------------------
// Family
// ---------------------------------------------------------------------------

/// The five supported model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Sd15,
    Sd2,
    Sdxl,
    Sd3,
    Flux,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 5] = [
        ModelFamily::Sd15,
        ModelFamily::Sd2,
        ModelFamily::Sdxl,
        ModelFamily::Sd3,
        ModelFamily::Flux,
    ];

    /// Detect the family from a model identifier or file name.
    ///
    /// Matching is case-insensitive and checked from the most to the least
    /// specific keyword; anything unrecognised is treated as SD 1.5.
    pub fn detect(model_id: &str) -> Self {
        let id = model_id.to_ascii_lowercase();
        if id.contains("flux") {
            ModelFamily::Flux
        } else if id.contains("sd3") {
            ModelFamily::Sd3
        } else if id.contains("xl") {
            ModelFamily::Sdxl
        } else if id.contains("sd2") || id.contains("v2") || id.contains("768") {
            ModelFamily::Sd2
        } else {
            ModelFamily::Sd15
        }
    }

    /// Human-readable label, as shown in status messages.
    pub fn label(self) -> &'static str {
        match self {
            ModelFamily::Sd15 => "SD 1.5",
            ModelFamily::Sd2 => "SD 2.x",
            ModelFamily::Sdxl => "SDXL",
            ModelFamily::Sd3 => "SD3",
            ModelFamily::Flux => "FLUX",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Precision
// ---------------------------------------------------------------------------

/// Numeric precision the pipeline runs (and is optimized) at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Float32,
    Float16,
    #[default]
    BFloat16,
}

// ---------------------------------------------------------------------------
// Component source
// ---------------------------------------------------------------------------

/// Where the base components (text encoders, denoiser, VAE) are opened from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentSource {
    /// Everything lives in the local checkpoint file.
    SingleFile { path: PathBuf },
    /// Base components come from a remote repository; the local checkpoint
    /// is injected on top as a weight delta.
    Remote { repo: String, gated: bool },
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Immutable description of a model, produced by [`ModelResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub family: ModelFamily,
    /// Local checkpoint file.
    pub weights_path: PathBuf,
    pub source: ComponentSource,
    pub precision: Precision,
    /// Low-step distilled variant (FLUX.1 schnell).
    pub fast: bool,
}

impl ModelDescriptor {
    /// Build a descriptor for `id` with weights at `weights_path`.
    pub fn new(id: impl Into<String>, weights_path: impl Into<PathBuf>) -> Self {
        let id = id.into();
        let weights_path = weights_path.into();
        let family = ModelFamily::detect(&id);
        let fast = family == ModelFamily::Flux && id.to_ascii_lowercase().contains("schnell");

        let source = match family {
            ModelFamily::Sd15 | ModelFamily::Sd2 | ModelFamily::Sdxl => {
                ComponentSource::SingleFile {
                    path: weights_path.clone(),
                }
            }
            ModelFamily::Sd3 => ComponentSource::Remote {
                repo: SD3_BASE_REPO.to_string(),
                gated: true,
            },
            ModelFamily::Flux if fast => ComponentSource::Remote {
                repo: FLUX_SCHNELL_BASE_REPO.to_string(),
                gated: false,
            },
            ModelFamily::Flux => ComponentSource::Remote {
                repo: FLUX_DEV_BASE_REPO.to_string(),
                gated: true,
            },
        };

        Self {
            id,
            family,
            weights_path,
            source,
            precision: Precision::default(),
            fast,
        }
    }

    /// Whether the local checkpoint is injected on top of remote base
    /// components rather than being the whole model.
    pub fn injects_weights(&self) -> bool {
        matches!(self.source, ComponentSource::Remote { .. })
    }

    /// The distilled FLUX variant ignores negative prompts.
    pub fn supports_negative_prompt(&self) -> bool {
        !(self.family == ModelFamily::Flux && self.fast)
    }

    /// VAE tiling is not available for FLUX pipelines.
    pub fn supports_vae_tiling(&self) -> bool {
        self.family != ModelFamily::Flux
    }

    /// The gated remote repository this descriptor needs, if any.
    pub fn gated_repo(&self) -> Option<&str> {
        match &self.source {
            ComponentSource::Remote { repo, gated: true } => Some(repo),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Maps model identifiers to descriptors for files in a models directory.
#[derive(Debug, Clone)]
pub struct ModelResolver {
    models_dir: PathBuf,
}

impl ModelResolver {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Resolve `model_id` (with or without the `.safetensors` extension).
    pub fn resolve(&self, model_id: &str) -> Result<ModelDescriptor, CoreError> {
        let (id, path) = locate_weights(&self.models_dir, model_id, "Model")?;
        Ok(ModelDescriptor::new(id, path))
    }
}

// ---------------------------------------------------------------------------
// LoRA
// ---------------------------------------------------------------------------

/// Placeholder sent by clients when no LoRA is selected.
pub const NO_LORA: &str = "None";

/// A LoRA adapter file selected at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoraRef {
    pub id: String,
    pub path: PathBuf,
}

/// Resolve an optional LoRA selection against `loras_dir`.
///
/// An empty selection or [`NO_LORA`] means no adapter.
pub fn resolve_lora(loras_dir: &Path, selection: Option<&str>) -> Result<Option<LoraRef>, CoreError> {
    let selection = selection.map(str::trim).unwrap_or_default();
    if selection.is_empty() || selection == NO_LORA {
        return Ok(None);
    }
    let (id, path) = locate_weights(loras_dir, selection, "LoRA")?;
    Ok(Some(LoraRef { id, path }))
}

fn locate_weights(
    dir: &Path,
    name: &str,
    entity: &'static str,
) -> Result<(String, PathBuf), CoreError> {
    let id = strip_weights_extension(name.trim());
    validate_file_stem(id)?;

    let path = dir.join(format!("{id}.{WEIGHTS_EXTENSION}"));
    if !path.is_file() {
        return Err(CoreError::NotFound {
            entity,
            id: id.to_string(),
        });
    }
    Ok((id.to_string(), path))
}

/// Strip a trailing `.safetensors` from an identifier.
pub fn strip_weights_extension(name: &str) -> &str {
    name.strip_suffix(".safetensors").unwrap_or(name)
}

/// Reject identifiers that could escape the models directory.
pub fn validate_file_stem(stem: &str) -> Result<(), CoreError> {
    if stem.is_empty() {
        return Err(CoreError::Validation(
            "Model identifier must not be empty".to_string(),
        ));
    }
    if stem.contains(['/', '\\']) || stem.contains("..") {
        return Err(CoreError::Validation(format!(
            "Invalid identifier '{stem}'"
        )));
    }
    Ok(())
}
