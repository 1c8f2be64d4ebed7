//! Static configuration for clients: what can be loaded and with which
//! parameters.

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use arttic_core::catalog::scan_weights;
use arttic_core::generation::{
    DEFAULT_GUIDANCE, DEFAULT_LORA_WEIGHT, DEFAULT_SAMPLER, DEFAULT_STEPS, DEFAULT_STRENGTH,
    MAX_DIMENSION, MAX_STEPS, MIN_DIMENSION, MIN_STEPS, SAMPLERS,
};
use arttic_core::model::{ModelFamily, NO_LORA};
use arttic_core::resolution::{aspect_presets, default_resolution, AspectPreset};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct FamilyInfo {
    pub family: ModelFamily,
    pub label: &'static str,
    pub default_width: u32,
    pub default_height: u32,
    pub presets: &'static [AspectPreset],
}

#[derive(Debug, Serialize)]
pub struct GenerationDefaults {
    pub sampler: &'static str,
    pub steps: u32,
    pub min_steps: u32,
    pub max_steps: u32,
    pub guidance: f32,
    pub lora_weight: f32,
    pub strength: f32,
    pub min_dimension: u32,
    pub max_dimension: u32,
}

#[derive(Debug, Serialize)]
pub struct ClientConfig {
    pub models: Vec<String>,
    /// Selectable LoRAs, with `"None"` first.
    pub loras: Vec<String>,
    pub samplers: &'static [&'static str],
    pub families: Vec<FamilyInfo>,
    pub defaults: GenerationDefaults,
}

/// GET /api/config
async fn get_config(State(state): State<AppState>) -> AppResult<Json<DataResponse<ClientConfig>>> {
    let models_dir = state.config.models_dir.clone();
    let loras_dir = state.config.loras_dir.clone();
    let (models, lora_files) =
        tokio::task::spawn_blocking(move || (scan_weights(&models_dir), scan_weights(&loras_dir)))
            .await
            .map_err(|e| AppError::InternalError(format!("Catalog scan task failed: {e}")))?;

    let mut loras = vec![NO_LORA.to_string()];
    loras.extend(lora_files);

    let families = ModelFamily::ALL
        .into_iter()
        .map(|family| {
            let (default_width, default_height) = default_resolution(family);
            FamilyInfo {
                family,
                label: family.label(),
                default_width,
                default_height,
                presets: aspect_presets(family),
            }
        })
        .collect();

    Ok(Json(DataResponse {
        data: ClientConfig {
            models,
            loras,
            samplers: SAMPLERS,
            families,
            defaults: GenerationDefaults {
                sampler: DEFAULT_SAMPLER,
                steps: DEFAULT_STEPS,
                min_steps: MIN_STEPS,
                max_steps: MAX_STEPS,
                guidance: DEFAULT_GUIDANCE,
                lora_weight: DEFAULT_LORA_WEIGHT,
                strength: DEFAULT_STRENGTH,
                min_dimension: MIN_DIMENSION,
                max_dimension: MAX_DIMENSION,
            },
        },
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/config", get(get_config))
}
