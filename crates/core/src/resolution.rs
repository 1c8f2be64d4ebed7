//! Default resolutions and aspect-ratio presets per model family.

use serde::Serialize;

use crate::model::ModelFamily;

/// A named aspect ratio with its pixel size for one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AspectPreset {
    pub ratio: &'static str,
    pub width: u32,
    pub height: u32,
}

const fn preset(ratio: &'static str, width: u32, height: u32) -> AspectPreset {
    AspectPreset {
        ratio,
        width,
        height,
    }
}

const PRESETS_SD15: [AspectPreset; 4] = [
    preset("1:1", 512, 512),
    preset("4:3", 576, 448),
    preset("3:2", 608, 416),
    preset("16:9", 672, 384),
];

const PRESETS_SD2: [AspectPreset; 4] = [
    preset("1:1", 768, 768),
    preset("4:3", 864, 640),
    preset("3:2", 960, 640),
    preset("16:9", 1024, 576),
];

const PRESETS_1024: [AspectPreset; 4] = [
    preset("1:1", 1024, 1024),
    preset("4:3", 1152, 896),
    preset("3:2", 1216, 832),
    preset("16:9", 1344, 768),
];

/// Aspect presets for `family`, square first.
pub fn aspect_presets(family: ModelFamily) -> &'static [AspectPreset] {
    match family {
        ModelFamily::Sd15 => &PRESETS_SD15,
        ModelFamily::Sd2 => &PRESETS_SD2,
        ModelFamily::Sdxl | ModelFamily::Sd3 | ModelFamily::Flux => &PRESETS_1024,
    }
}

/// Native square resolution of `family`.
pub fn default_resolution(family: ModelFamily) -> (u32, u32) {
    let square = aspect_presets(family)[0];
    (square.width, square.height)
}
