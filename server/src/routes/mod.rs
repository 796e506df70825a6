//! HTTP routes

pub mod chat;
pub mod health;
pub mod predict;
pub mod sample_image;
pub mod weather;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::SharedState;

/// `lat`/`lon` query parameters; unparseable values count as missing
#[derive(Debug, Default, Deserialize)]
pub struct Coordinates {
    pub lat: Option<String>,
    pub lon: Option<String>,
}

impl Coordinates {
    pub fn point(&self) -> Option<(f64, f64)> {
        let lat = self.lat.as_deref()?.trim().parse().ok()?;
        let lon = self.lon.as_deref()?.trim().parse().ok()?;
        Some((lat, lon))
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let body_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);

    Router::new()
        // Prediction
        .route("/predict", post(predict::predict))

        // Services
        .route("/api/health", get(health::health_check))
        .route("/api/weather", get(weather::get_weather))
        .route("/api/chat", post(chat::chat))
        .route("/get_sample_image", get(sample_image::get_sample_image))

        .with_state(state)
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use geocrop::backend::{default_device, InferenceBackend};
    use geocrop::dataset::DEFAULT_TAB_COLUMNS;
    use geocrop::{Checkpoint, CheckpointMetadata, CropPredictor, GeoNetConfig, ImageSpec};

    use super::*;
    use crate::state::{AppState, ServerConfig};

    const BOUNDARY: &str = "geocrop-test-boundary";

    fn predictor() -> CropPredictor<InferenceBackend> {
        let metadata = CheckpointMetadata::new(
            vec!["Wheat".into(), "Rice".into(), "Maize".into()],
            DEFAULT_TAB_COLUMNS.iter().map(|c| c.to_string()).collect(),
            ImageSpec::with_size(16),
            GeoNetConfig::new().with_base_filters(4).with_fusion_dim(16),
        );
        let device = default_device();
        let checkpoint = Checkpoint::<InferenceBackend>::init(metadata, &device).unwrap();
        CropPredictor::from_checkpoint(checkpoint, device)
    }

    fn app_with(config: ServerConfig) -> Router {
        let state = AppState::new(config, predictor()).unwrap();
        build_router(Arc::new(state))
    }

    fn config(fallback_dir: &Path) -> ServerConfig {
        ServerConfig {
            fallback_image_dir: fallback_dir.to_path_buf(),
            ..ServerConfig::default()
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 10) as u8, (y * 10) as u8, 90])
        });
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    /// Incompressible RGB noise, so the PNG is roughly `3 * width * height` bytes
    fn noise_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut state: u32 = 0x9e37_79b9;
        let image = image::RgbImage::from_fn(width, height, |_, _| {
            let mut next = || {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            };
            image::Rgb([next(), next(), next()])
        });
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn multipart_body(fields: &[(&str, &str)], image: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = image {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"field.png\"\r\nContent-Type: image/png\r\n\r\n",
                    BOUNDARY
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn predict_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const SCENARIO: [(&str, &str); 8] = [
        ("ph", "6.4"),
        ("N", "25"),
        ("P", "18"),
        ("K", "14"),
        ("rainfall", "900"),
        ("temp", "30.1"),
        ("lat", "19.10"),
        ("lon", "73.80"),
    ];

    #[test]
    fn test_coordinates_point() {
        let coords = |lat: Option<&str>, lon: Option<&str>| Coordinates {
            lat: lat.map(String::from),
            lon: lon.map(String::from),
        };
        assert_eq!(coords(Some("19.1"), Some("73.8")).point(), Some((19.1, 73.8)));
        assert_eq!(coords(Some("19.1"), None).point(), None);
        assert_eq!(coords(Some("north"), Some("73.8")).point(), None);
    }

    #[tokio::test]
    async fn test_health_reports_model_and_services() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));

        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_loaded"], true);
        assert_eq!(body["weather_configured"], false);
        assert_eq!(body["sentinel_configured"], false);
        assert_eq!(body["image_size"], 16);
        assert_eq!(
            body["crop_classes"],
            serde_json::json!(["Wheat", "Rice", "Maize"])
        );
    }

    #[tokio::test]
    async fn test_cors_allows_default_frontend_origin() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn test_weather_requires_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));

        let response = app
            .oneshot(Request::builder().uri("/api/weather?lat=19.1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Missing lat or lon parameters");
    }

    #[tokio::test]
    async fn test_weather_unconfigured_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/weather?lat=19.1&lon=73.8")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            json_body(response).await["message"],
            "Set OPENWEATHER_API_KEY environment variable"
        );
    }

    #[tokio::test]
    async fn test_chat_unconfigured_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"message":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["error"], "Gemini API not configured");
    }

    #[tokio::test]
    async fn test_chat_requires_message() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(ServerConfig {
            gemini_api_key: Some("test-key".into()),
            ..config(dir.path())
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"history":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Message is required");
    }

    #[tokio::test]
    async fn test_predict_returns_full_response() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));

        let mut fields = SCENARIO.to_vec();
        fields.push(("area", "4"));
        let image = png_bytes(40, 30);

        let response = app
            .oneshot(predict_request(multipart_body(&fields, Some(image.as_slice()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let crop = body["crop"].as_str().unwrap();
        assert!(["Wheat", "Rice", "Maize"].contains(&crop));
        assert!(body["confidence"].as_str().unwrap().ends_with('%'));
        assert_eq!(body["w_img"].as_str().unwrap().len(), 6);

        let image_weight = body["image_weight"].as_f64().unwrap();
        let tabular_weight = body["tabular_weight"].as_f64().unwrap();
        assert!((image_weight + tabular_weight - 100.0).abs() < 0.02);

        let top = body["top_predictions"].as_array().unwrap();
        assert_eq!(top.len(), 3);
        assert_eq!(top[0]["crop"], crop);

        assert_eq!(body["yield_estimate"]["area_acres"], 4.0);
        assert!(!body["recommendation"].as_str().unwrap().is_empty());

        let steps = body["processing"]["steps"].as_array().unwrap();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[2]["name"], "Image Analysis");
        assert!(steps[2]["details"].as_str().unwrap().contains("40x30"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_predictions_agree() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));
        let image = png_bytes(24, 24);

        let requests: Vec<_> = (0..4)
            .map(|_| {
                let app = app.clone();
                let body = multipart_body(&SCENARIO, Some(image.as_slice()));
                tokio::spawn(async move { app.oneshot(predict_request(body)).await.unwrap() })
            })
            .collect();

        let mut answers = Vec::new();
        for request in requests {
            let response = request.await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            answers.push((body["crop"].clone(), body["w_img"].clone()));
        }
        assert!(answers.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn test_predict_without_area_has_no_yield() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));
        let image = png_bytes(16, 16);

        let response = app
            .oneshot(predict_request(multipart_body(&SCENARIO, Some(image.as_slice()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(json_body(response).await["yield_estimate"].is_null());
    }

    #[tokio::test]
    async fn test_predict_without_image_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));

        let response = app
            .oneshot(predict_request(multipart_body(&SCENARIO, None)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "No image uploaded");
    }

    #[tokio::test]
    async fn test_predict_rejects_non_finite_feature() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));

        let mut fields = SCENARIO.to_vec();
        fields[0] = ("ph", "NaN");
        let image = png_bytes(16, 16);

        let response = app
            .oneshot(predict_request(multipart_body(&fields, Some(image.as_slice()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict_rejects_undecodable_image() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));

        let response = app
            .oneshot(predict_request(multipart_body(&SCENARIO, Some(&b"not an image"[..]))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict_accepts_upload_over_two_megabytes() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(dir.path()));

        let image = noise_png_bytes(1024, 1024);
        assert!(image.len() > 2 * 1024 * 1024);

        let response = app
            .oneshot(predict_request(multipart_body(&SCENARIO, Some(image.as_slice()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let steps = body["processing"]["steps"].as_array().unwrap();
        assert!(steps[2]["details"].as_str().unwrap().contains("1024x1024"));
    }

    #[tokio::test]
    async fn test_predict_over_upload_limit_is_413() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(ServerConfig {
            max_upload_bytes: 4 * 1024,
            ..config(dir.path())
        });

        let image = noise_png_bytes(64, 64);
        assert!(image.len() > 4 * 1024);

        let response = app
            .oneshot(predict_request(multipart_body(&SCENARIO, Some(image.as_slice()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(response).await["error"], "Upload too large");
    }

    #[tokio::test]
    async fn test_sample_image_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("field.png"), png_bytes(8, 8)).unwrap();
        let app = app_with(config(dir.path()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/get_sample_image?lat=19.1&lon=73.8")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    }

    #[tokio::test]
    async fn test_sample_image_without_fallback_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(config(&dir.path().join("missing")));

        let response = app
            .oneshot(Request::builder().uri("/get_sample_image").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "Image directory not found");
    }
}
