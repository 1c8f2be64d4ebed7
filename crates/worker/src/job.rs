use arttic_core::generation::GenerationRequest;
use arttic_core::model::ModelDescriptor;
use arttic_core::status::PipelineSnapshot;
use arttic_pipeline::{GenerationMetadata, LoadOptions, OptimizeOutcome};

use crate::store::GalleryEntry;

/// Work that needs exclusive access to the pipeline.
#[derive(Debug, Clone)]
pub enum Job {
    LoadModel {
        descriptor: ModelDescriptor,
        options: LoadOptions,
    },
    UnloadModel,
    Optimize,
    /// Text-to-image, or image-to-image when the request names an init image.
    Generate(GenerationRequest),
    DeleteImage {
        filename: String,
    },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::LoadModel { .. } => "load_model",
            Job::UnloadModel => "unload_model",
            Job::Optimize => "optimize",
            Job::Generate(_) => "generate_image",
            Job::DeleteImage { .. } => "delete_image",
        }
    }
}

/// Successful result of a [`Job`].
#[derive(Debug, Clone)]
pub enum JobOutput {
    Loaded {
        snapshot: PipelineSnapshot,
    },
    Unloaded {
        released: bool,
        snapshot: PipelineSnapshot,
    },
    Optimized {
        outcome: OptimizeOutcome,
        snapshot: PipelineSnapshot,
    },
    Generated {
        filename: String,
        metadata: GenerationMetadata,
        gallery: Vec<GalleryEntry>,
    },
    Deleted {
        filename: String,
        deleted: bool,
        gallery: Vec<GalleryEntry>,
    },
}
