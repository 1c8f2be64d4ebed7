//! On-disk catalog of models, LoRAs, and generated image file names.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;
use crate::model::WEIGHTS_EXTENSION;

/// Extensions accepted for gallery images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

static IMAGE_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z0-9][a-z0-9._-]*\.(png|jpe?g|webp)$").expect("valid regex")
});

/// Validate a gallery image file name.
///
/// Only bare file names are accepted: no directories, no `..`, and one of
/// the [`IMAGE_EXTENSIONS`].
pub fn validate_image_filename(name: &str) -> Result<(), CoreError> {
    if name.contains("..") || !IMAGE_FILENAME_RE.is_match(name) {
        return Err(CoreError::Validation(format!(
            "Invalid image filename '{name}'"
        )));
    }
    Ok(())
}

/// List the weight files in `dir` by identifier (file stem), sorted.
///
/// A missing directory yields an empty list.
pub fn scan_weights(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut ids: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let path = e.path();
            let is_weights = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(WEIGHTS_EXTENSION));
            if !is_weights {
                return None;
            }
            path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
        })
        .collect();

    ids.sort_by_key(|id| id.to_ascii_lowercase());
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn accepts_plain_image_names() {
        validate_image_filename("20250101_120000_12345.png").unwrap();
        validate_image_filename("photo.JPEG").unwrap();
        validate_image_filename("a.webp").unwrap();
    }

    #[test]
    fn rejects_paths_and_other_extensions() {
        for name in ["../x.png", "dir/x.png", "x.txt", ".hidden.png", "", "x..png"] {
            assert_matches!(validate_image_filename(name), Err(CoreError::Validation(_)), "{name}");
        }
    }

    #[test]
    fn scan_lists_only_weight_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sdxl-base.safetensors"), b"").unwrap();
        std::fs::write(dir.path().join("Anime.safetensors"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::create_dir(dir.path().join("sub.safetensors")).unwrap();

        assert_eq!(scan_weights(dir.path()), vec!["Anime", "sdxl-base"]);
    }

    #[test]
    fn scan_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_weights(&dir.path().join("nope")).is_empty());
    }
}
