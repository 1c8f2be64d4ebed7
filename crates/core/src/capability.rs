//! Generation modes and the per-family capability table.
//!
//! Switching modes never reloads weights: the pipeline wrapper for the new
//! mode is assembled from the component set that is already in memory. The
//! table below says which wrapper (if any) each family provides per mode.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::ModelFamily;

/// Generation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    TextToImage,
    ImageToImage,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::TextToImage => "txt2img",
            Mode::ImageToImage => "img2img",
        })
    }
}

/// Concrete pipeline wrapper kinds a backend knows how to assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    StableDiffusion,
    StableDiffusionImg2Img,
    StableDiffusionXl,
    StableDiffusionXlImg2Img,
    StableDiffusion3,
    StableDiffusion3Img2Img,
    Flux,
}

impl PipelineKind {
    pub fn mode(self) -> Mode {
        match self {
            PipelineKind::StableDiffusion
            | PipelineKind::StableDiffusionXl
            | PipelineKind::StableDiffusion3
            | PipelineKind::Flux => Mode::TextToImage,
            PipelineKind::StableDiffusionImg2Img
            | PipelineKind::StableDiffusionXlImg2Img
            | PipelineKind::StableDiffusion3Img2Img => Mode::ImageToImage,
        }
    }

    /// Transformer-based families optimize a transformer instead of a UNet.
    pub fn has_transformer(self) -> bool {
        matches!(
            self,
            PipelineKind::StableDiffusion3 | PipelineKind::StableDiffusion3Img2Img | PipelineKind::Flux
        )
    }
}

/// Read-only `(family, mode) -> wrapper` lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityTable;

impl CapabilityTable {
    /// The wrapper for `family` in `mode`, or `None` if the family cannot
    /// run in that mode.
    pub fn lookup(&self, family: ModelFamily, mode: Mode) -> Option<PipelineKind> {
        match (family, mode) {
            (ModelFamily::Sd15 | ModelFamily::Sd2, Mode::TextToImage) => {
                Some(PipelineKind::StableDiffusion)
            }
            (ModelFamily::Sd15 | ModelFamily::Sd2, Mode::ImageToImage) => {
                Some(PipelineKind::StableDiffusionImg2Img)
            }
            (ModelFamily::Sdxl, Mode::TextToImage) => Some(PipelineKind::StableDiffusionXl),
            (ModelFamily::Sdxl, Mode::ImageToImage) => Some(PipelineKind::StableDiffusionXlImg2Img),
            (ModelFamily::Sd3, Mode::TextToImage) => Some(PipelineKind::StableDiffusion3),
            (ModelFamily::Sd3, Mode::ImageToImage) => Some(PipelineKind::StableDiffusion3Img2Img),
            (ModelFamily::Flux, Mode::TextToImage) => Some(PipelineKind::Flux),
            (ModelFamily::Flux, Mode::ImageToImage) => None,
        }
    }

    /// Mode a freshly loaded pipeline starts in.
    pub fn default_mode(&self, _family: ModelFamily) -> Mode {
        Mode::TextToImage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_family_supports_text_to_image() {
        let table = CapabilityTable;
        for family in ModelFamily::ALL {
            let kind = table.lookup(family, Mode::TextToImage).unwrap();
            assert_eq!(kind.mode(), Mode::TextToImage);
            assert_eq!(table.default_mode(family), Mode::TextToImage);
        }
    }

    #[test]
    fn flux_has_no_image_to_image_wrapper() {
        let table = CapabilityTable;
        assert_eq!(table.lookup(ModelFamily::Flux, Mode::ImageToImage), None);
        assert!(table.lookup(ModelFamily::Sdxl, Mode::ImageToImage).is_some());
    }

    #[test]
    fn image_to_image_kinds_report_their_mode() {
        let table = CapabilityTable;
        for family in [ModelFamily::Sd15, ModelFamily::Sd2, ModelFamily::Sdxl, ModelFamily::Sd3] {
            let kind = table.lookup(family, Mode::ImageToImage).unwrap();
            assert_eq!(kind.mode(), Mode::ImageToImage);
        }
    }

    #[test]
    fn transformer_kinds() {
        assert!(PipelineKind::Flux.has_transformer());
        assert!(PipelineKind::StableDiffusion3.has_transformer());
        assert!(!PipelineKind::StableDiffusionXl.has_transformer());
    }
}
