//! Persistence of generated images.
//!
//! Images are written as PNG files into a flat outputs directory, each with
//! a JSON sidecar holding its [`GenerationMetadata`]. Only bare, validated
//! file names ever reach the filesystem.

use std::path::{Path, PathBuf};

use arttic_core::catalog::{validate_image_filename, IMAGE_EXTENSIONS};
use arttic_core::error::CoreError;
use arttic_core::types::Timestamp;
use arttic_pipeline::GenerationMetadata;
use chrono::Utc;
use image::RgbImage;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error("Image '{0}' not found")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("Metadata encoding error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// One image in the gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalleryEntry {
    pub filename: String,
    pub created_at: Timestamp,
}

/// Where generated images live.
pub trait ImageStore: Send + Sync + 'static {
    /// Persist `image` and return its file name.
    fn save(&self, image: &RgbImage, metadata: &GenerationMetadata) -> Result<String, StoreError>;

    /// Decode a stored image, e.g. as an image-to-image source.
    fn open(&self, filename: &str) -> Result<RgbImage, StoreError>;

    /// All stored images, newest first.
    fn list(&self) -> Result<Vec<GalleryEntry>, StoreError>;

    /// Delete an image. Returns `false` if it did not exist.
    fn delete(&self, filename: &str) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------
// Local directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    /// Open (and create if needed) the outputs directory at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, filename: &str) -> Result<PathBuf, StoreError> {
        validate_image_filename(filename)?;
        Ok(self.root.join(filename))
    }

    fn sidecar_of(path: &Path) -> PathBuf {
        path.with_extension("json")
    }

    /// A fresh file name: `<utc timestamp>_<seed>.png`, suffixed on clash.
    fn next_filename(&self, seed: u64) -> String {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let base = format!("{stamp}_{seed}");
        let mut name = format!("{base}.png");
        let mut n = 1;
        while self.root.join(&name).exists() {
            name = format!("{base}_{n}.png");
            n += 1;
        }
        name
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

impl ImageStore for LocalImageStore {
    fn save(&self, image: &RgbImage, metadata: &GenerationMetadata) -> Result<String, StoreError> {
        let filename = self.next_filename(metadata.seed);
        let path = self.root.join(&filename);
        image.save_with_format(&path, image::ImageFormat::Png)?;
        std::fs::write(
            Self::sidecar_of(&path),
            serde_json::to_vec_pretty(metadata)?,
        )?;
        tracing::debug!(filename = %filename, "Saved image");
        Ok(filename)
    }

    fn open(&self, filename: &str) -> Result<RgbImage, StoreError> {
        let path = self.path_of(filename)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(filename.to_string()));
        }
        Ok(image::open(&path)?.to_rgb8())
    }

    fn list(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() || !is_image(&path) {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let created_at: Timestamp = entry.metadata()?.modified()?.into();
            entries.push(GalleryEntry {
                filename: filename.to_string(),
                created_at,
            });
        }
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(entries)
    }

    fn delete(&self, filename: &str) -> Result<bool, StoreError> {
        let path = self.path_of(filename)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        match std::fs::remove_file(Self::sidecar_of(&path)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(filename, error = %e, "Failed to remove metadata sidecar"),
        }
        tracing::debug!(filename, "Deleted image");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arttic_core::capability::Mode;
    use arttic_core::model::ModelFamily;
    use assert_matches::assert_matches;

    fn metadata(seed: u64) -> GenerationMetadata {
        GenerationMetadata {
            model: "sd15-A".into(),
            family: ModelFamily::Sd15,
            mode: Mode::TextToImage,
            sampler: "Euler A".into(),
            prompt: "a cat".into(),
            negative_prompt: String::new(),
            steps: 4,
            guidance: 7.0,
            seed,
            width: 32,
            height: 16,
            lora: None,
            lora_weight: None,
            init_image: None,
            strength: None,
            duration_secs: 0.1,
        }
    }

    #[test]
    fn save_writes_png_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path().join("outputs")).unwrap();

        let filename = store.save(&RgbImage::new(32, 16), &metadata(12345)).unwrap();
        assert!(filename.ends_with("_12345.png"));

        let sidecar = std::fs::read_to_string(store.root().join(&filename).with_extension("json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&sidecar).unwrap();
        assert_eq!(json["seed"], 12345);

        let reopened = store.open(&filename).unwrap();
        assert_eq!(reopened.dimensions(), (32, 16));
    }

    #[test]
    fn list_skips_non_images_and_returns_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path()).unwrap();

        let first = store.save(&RgbImage::new(8, 8), &metadata(1)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = store.save(&RgbImage::new(8, 8), &metadata(2)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|e| e.filename).collect();
        assert_eq!(names, vec![second, first]);
    }

    #[test]
    fn saving_same_seed_twice_yields_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path()).unwrap();

        let a = store.save(&RgbImage::new(8, 8), &metadata(7)).unwrap();
        let b = store.save(&RgbImage::new(8, 8), &metadata(7)).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path()).unwrap();
        let filename = store.save(&RgbImage::new(8, 8), &metadata(3)).unwrap();

        assert!(store.delete(&filename).unwrap());
        assert!(!store.delete(&filename).unwrap());
        assert!(!dir.path().join(&filename).with_extension("json").exists());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn rejects_unsafe_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path()).unwrap();

        assert_matches!(store.delete("../secret.png"), Err(StoreError::Invalid(_)));
        assert_matches!(store.delete("nested/a.png"), Err(StoreError::Invalid(_)));
        assert_matches!(store.open("model.safetensors"), Err(StoreError::Invalid(_)));
        assert_matches!(store.open("missing.png"), Err(StoreError::NotFound(_)));
    }
}
