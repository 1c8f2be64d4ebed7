use axum::extract::State;
use axum::{routing::get, Json, Router};

use crate::response::DataResponse;
use crate::state::AppState;
use crate::ws::messages::StatusData;

/// GET /api/status -- the state published after the most recent job.
async fn get_status(State(state): State<AppState>) -> Json<DataResponse<StatusData>> {
    let snapshot = state.executor.snapshot();
    Json(DataResponse {
        data: StatusData::from(&snapshot),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(get_status))
}
