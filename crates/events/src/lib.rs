//! ArtTic event channels.
//!
//! - [`ProgressSink`] / [`ProgressEvent`]: per-job progress channel written
//!   by the worker and relayed to the requesting connection.
//! - [`EventBus`] / [`PipelineEvent`]: in-process fan-out of pipeline state
//!   changes, consumed by the notification router.

pub mod bus;
pub mod progress;

pub use bus::{EventBus, PipelineEvent};
pub use progress::{progress_channel, ProgressEvent, ProgressSink};
