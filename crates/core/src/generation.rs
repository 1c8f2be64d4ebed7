//! Generation request parameters, samplers, and validation.
//!
//! Requests arrive as JSON payloads from clients and are validated here,
//! before they are queued on the worker, so that a malformed request never
//! occupies the accelerator.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::catalog::validate_image_filename;
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Bounds and defaults
// ---------------------------------------------------------------------------

pub const MIN_DIMENSION: u32 = 256;
pub const MAX_DIMENSION: u32 = 2048;
/// Latent space is downsampled 8x, so pixel sizes must be multiples of 8.
pub const DIMENSION_MULTIPLE: u32 = 8;

pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 150;

pub const DEFAULT_STEPS: u32 = 28;
pub const DEFAULT_GUIDANCE: f32 = 7.0;
pub const DEFAULT_LORA_WEIGHT: f32 = 0.7;
pub const DEFAULT_STRENGTH: f32 = 0.75;

// ---------------------------------------------------------------------------
// Samplers
// ---------------------------------------------------------------------------

/// Samplers selectable at load time.
pub const SAMPLERS: &[&str] = &[
    "Euler A",
    "Euler",
    "DPM++ 2M",
    "DPM++ 2M Karras",
    "DDIM",
    "LMS",
    "Heun",
    "UniPC",
];

pub const DEFAULT_SAMPLER: &str = "Euler A";

pub fn validate_sampler(sampler: &str) -> Result<(), CoreError> {
    if SAMPLERS.contains(&sampler) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unknown sampler '{sampler}'. Must be one of: {SAMPLERS:?}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A single image generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerationRequest {
    #[validate(length(min = 1, message = "Prompt must not be empty"))]
    pub prompt: String,

    /// Ignored by models that do not support negative prompts.
    #[serde(default)]
    pub negative_prompt: String,

    #[serde(default = "default_steps")]
    #[validate(range(min = 1, max = 150))]
    pub steps: u32,

    #[serde(default = "default_guidance")]
    #[validate(range(min = 0.0, max = 30.0))]
    pub guidance: f32,

    /// `None` or a negative value requests a random seed.
    #[serde(default)]
    pub seed: Option<i64>,

    #[serde(default = "default_dimension")]
    pub width: u32,

    #[serde(default = "default_dimension")]
    pub height: u32,

    #[serde(default = "default_lora_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub lora_weight: f32,

    /// Gallery image to start from; switches the pipeline to image-to-image.
    #[serde(default)]
    pub init_image: Option<String>,

    /// How far image-to-image may move away from the init image.
    #[serde(default = "default_strength")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub strength: f32,
}

fn default_steps() -> u32 {
    DEFAULT_STEPS
}

fn default_guidance() -> f32 {
    DEFAULT_GUIDANCE
}

fn default_dimension() -> u32 {
    512
}

fn default_lora_weight() -> f32 {
    DEFAULT_LORA_WEIGHT
}

fn default_strength() -> f32 {
    DEFAULT_STRENGTH
}

/// Check one pixel dimension against the supported bounds.
pub fn validate_dimension(name: &str, value: u32) -> Result<(), CoreError> {
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) || value % DIMENSION_MULTIPLE != 0 {
        return Err(CoreError::Validation(format!(
            "{name} must be between {MIN_DIMENSION} and {MAX_DIMENSION} and a multiple of {DIMENSION_MULTIPLE}, got {value}"
        )));
    }
    Ok(())
}

impl GenerationRequest {
    /// A text-to-image request with default parameters.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            steps: DEFAULT_STEPS,
            guidance: DEFAULT_GUIDANCE,
            seed: None,
            width: default_dimension(),
            height: default_dimension(),
            lora_weight: DEFAULT_LORA_WEIGHT,
            init_image: None,
            strength: DEFAULT_STRENGTH,
        }
    }

    /// Validate all fields, returning a single readable message on failure.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::Validation("Prompt must not be empty".to_string()));
        }
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        validate_dimension("width", self.width)?;
        validate_dimension("height", self.height)?;
        if let Some(init) = &self.init_image {
            validate_image_filename(init)?;
        }
        Ok(())
    }

    /// Replace a missing or negative seed with a random one.
    pub fn with_resolved_seed(mut self) -> Self {
        if self.seed.is_none_or(|s| s < 0) {
            self.seed = Some(i64::from(rand::random::<u32>()));
        }
        self
    }

    /// The seed to run with, or `None` while it still needs resolving.
    pub fn resolved_seed(&self) -> Option<u64> {
        self.seed.and_then(|s| u64::try_from(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn payload_defaults_are_applied() {
        let req: GenerationRequest =
            serde_json::from_value(serde_json::json!({ "prompt": "a lighthouse" })).unwrap();
        assert_eq!(req.steps, DEFAULT_STEPS);
        assert_eq!(req.guidance, DEFAULT_GUIDANCE);
        assert_eq!(req.width, 512);
        assert_eq!(req.lora_weight, DEFAULT_LORA_WEIGHT);
        assert!(req.seed.is_none());
        assert!(req.init_image.is_none());
        req.check().unwrap();
    }

    #[test]
    fn rejects_empty_prompt() {
        let req = GenerationRequest::new("   ");
        assert_matches!(req.check(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn rejects_zero_steps() {
        let mut req = GenerationRequest::new("cat");
        req.steps = 0;
        assert_matches!(req.check(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn rejects_out_of_bounds_dimensions() {
        let mut req = GenerationRequest::new("cat");
        req.width = 4096;
        assert_matches!(req.check(), Err(CoreError::Validation(_)));

        let mut req = GenerationRequest::new("cat");
        req.height = 513;
        assert_matches!(req.check(), Err(CoreError::Validation(_)));

        let mut req = GenerationRequest::new("cat");
        req.width = 128;
        assert_matches!(req.check(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn rejects_lora_weight_above_one() {
        let mut req = GenerationRequest::new("cat");
        req.lora_weight = 1.5;
        assert_matches!(req.check(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn rejects_unsafe_init_image() {
        let mut req = GenerationRequest::new("cat");
        req.init_image = Some("../secret.png".to_string());
        assert_matches!(req.check(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn explicit_seed_is_kept() {
        let mut req = GenerationRequest::new("cat");
        req.seed = Some(12345);
        let req = req.with_resolved_seed();
        assert_eq!(req.seed, Some(12345));
        assert_eq!(req.resolved_seed(), Some(12345));
    }

    #[test]
    fn negative_seed_is_randomized() {
        let mut req = GenerationRequest::new("cat");
        req.seed = Some(-1);
        assert_eq!(req.resolved_seed(), None);
        let req = req.with_resolved_seed();
        assert!(req.resolved_seed().is_some());
    }

    #[test]
    fn sampler_validation() {
        validate_sampler(DEFAULT_SAMPLER).unwrap();
        assert_matches!(validate_sampler("Magic"), Err(CoreError::Validation(_)));
    }
}
