use arttic_core::error::CoreError;
use arttic_pipeline::PipelineError;

use crate::store::StoreError;

/// Why a submitted job did not produce an output.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Job executor is not running")]
    ExecutorGone,

    #[error("Job crashed: {0}")]
    Panicked(String),
}
