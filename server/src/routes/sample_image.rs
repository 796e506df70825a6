//! Satellite sample image endpoint

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::Coordinates;
use crate::error::ApiError;
use crate::satellite::{content_type, FallbackImages};
use crate::state::SharedState;

async fn fallback_image(fallback: &FallbackImages) -> Result<Response, ApiError> {
    let Some(path) = fallback.pick() else {
        let error = if fallback.dir().is_dir() {
            "No images found"
        } else {
            "Image directory not found"
        };
        return Err(ApiError::not_found(error));
    };

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to read {:?}: {}", path, e)))?;
    let mime = content_type(&path).unwrap_or("application/octet-stream");

    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

/// GET /get_sample_image?lat&lon - Sentinel-2 tile, or a local fallback
pub async fn get_sample_image(
    State(state): State<SharedState>,
    Query(query): Query<Coordinates>,
) -> Result<Response, ApiError> {
    if let (Some((lat, lon)), Some(sentinel)) = (query.point(), state.sentinel.as_ref()) {
        match sentinel.true_color(lat, lon).await {
            Ok(bytes) => return Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response()),
            Err(e) => warn!("Error fetching satellite image: {}. Falling back to local images.", e),
        }
    }

    fallback_image(&state.fallback).await
}
