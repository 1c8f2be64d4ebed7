use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Json, Router};

use arttic_worker::ImageStore;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;
use crate::ws::messages::GalleryImage;

/// The gallery, newest first, read off the async runtime.
pub async fn load_gallery(store: &Arc<dyn ImageStore>) -> AppResult<Vec<GalleryImage>> {
    let store = Arc::clone(store);
    let entries = tokio::task::spawn_blocking(move || store.list())
        .await
        .map_err(|e| AppError::InternalError(format!("Gallery listing task failed: {e}")))??;
    Ok(entries.into_iter().map(GalleryImage::from).collect())
}

/// GET /api/images
async fn list_images(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<GalleryImage>>>> {
    let images = load_gallery(&state.store).await?;
    Ok(Json(DataResponse { data: images }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/images", get(list_images))
}
