//! Health check endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sentinel_configured: bool,
    pub weather_configured: bool,
    pub chat_configured: bool,
    pub model_loaded: bool,
    pub crop_classes: Vec<String>,
    pub image_size: u32,
    pub uptime_seconds: u64,
    pub version: String,
}

/// GET /api/health - Service configuration and model status
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        sentinel_configured: state.sentinel.is_some(),
        weather_configured: state.weather.is_configured(),
        chat_configured: state.chat.is_some(),
        // startup fails without a valid checkpoint
        model_loaded: true,
        crop_classes: state.metadata.crop_classes.clone(),
        image_size: state.metadata.image.size,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
