//! Single-flight job execution against the pipeline.
//!
//! [`JobExecutor`] moves the one [`PipelineManager`](arttic_pipeline::PipelineManager)
//! into a dedicated OS thread and feeds it jobs in submission order.
//! Callers hold a cloneable [`ExecutorHandle`].

pub mod error;
pub mod executor;
pub mod job;
pub mod store;

pub use error::JobError;
pub use executor::{ExecutorHandle, JobExecutor};
pub use job::{Job, JobOutput};
pub use store::{GalleryEntry, ImageStore, LocalImageStore, StoreError};
