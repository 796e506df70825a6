//! Weather endpoint

use axum::extract::{Query, State};
use axum::Json;
use tracing::error;

use super::Coordinates;
use crate::error::ApiError;
use crate::state::SharedState;
use crate::weather::WeatherReport;

/// GET /api/weather?lat&lon - Current conditions and 5-day forecast
pub async fn get_weather(
    State(state): State<SharedState>,
    Query(query): Query<Coordinates>,
) -> Result<Json<WeatherReport>, ApiError> {
    let Some((lat, lon)) = query.point() else {
        return Err(ApiError::bad_request("Missing lat or lon parameters"));
    };

    if !state.weather.is_configured() {
        return Err(ApiError::unavailable("Weather service not configured")
            .with_message("Set OPENWEATHER_API_KEY environment variable"));
    }

    state.weather.report(lat, lon).await.map(Json).map_err(|e| {
        error!("Weather API error: {}", e);
        ApiError::internal(e.to_string())
    })
}
