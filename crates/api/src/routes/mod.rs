pub mod config;
pub mod health;
pub mod images;
pub mod status;

use axum::Router;

use crate::state::AppState;

/// Read-only HTTP routes, mounted under `/api`.
///
/// ```text
/// GET /config   models, LoRAs, samplers, family presets, defaults
/// GET /status   current pipeline state
/// GET /images   gallery listing, newest first
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(config::router())
        .merge(status::router())
        .merge(images::router())
}
