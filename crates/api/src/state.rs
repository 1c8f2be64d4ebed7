use std::sync::Arc;

use arttic_core::model::ModelResolver;
use arttic_worker::{ExecutorHandle, ImageStore};

use crate::config::ServerConfig;
use crate::ws::ConnectionRegistry;

/// Shared application state available to all Axum handlers.
///
/// Cheap to clone: every field is an `Arc` or a handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<ConnectionRegistry>,
    /// Front door to the single worker that owns the accelerator.
    pub executor: ExecutorHandle,
    pub store: Arc<dyn ImageStore>,
    pub resolver: ModelResolver,
}
