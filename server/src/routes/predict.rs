//! Crop prediction endpoint

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use geocrop::backend::InferenceBackend;
use geocrop::inference::recommendation;
use geocrop::utils::round_to;
use geocrop::{
    CropPredictor, FeatureVector, GeoCropError, ImageSpec, Prediction, YieldEstimate,
    DEFAULT_TOP_K,
};

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct ProcessingStep {
    pub step: usize,
    pub name: &'static str,
    pub status: &'static str,
    /// Milliseconds, 2 decimals
    pub duration: f64,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct Processing {
    pub steps: Vec<ProcessingStep>,
    pub total_time_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct TopPrediction {
    pub crop: String,
    pub probability: f32,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub crop: String,
    /// e.g. `"87.41%"`
    pub confidence: String,
    pub confidence_value: f64,
    pub w_img: String,
    pub w_tab: String,
    pub image_weight: f64,
    pub tabular_weight: f64,
    pub recommendation: String,
    pub top_predictions: Vec<TopPrediction>,
    pub yield_estimate: Option<YieldEstimate>,
    pub processing: Processing,
}

#[derive(Default)]
struct PredictForm {
    image: Option<Vec<u8>>,
    fields: HashMap<String, String>,
}

struct Inference {
    prediction: Prediction,
    original_size: (u32, u32),
    image_ms: f64,
    inference_ms: f64,
}

fn elapsed_ms(since: Instant) -> f64 {
    round_to(since.elapsed().as_secs_f64() * 1000.0, 2)
}

fn step(steps: &mut Vec<ProcessingStep>, name: &'static str, duration: f64, details: String) {
    steps.push(ProcessingStep {
        step: steps.len() + 1,
        name,
        status: "completed",
        duration,
        details,
    });
}

/// Keeps the status multer assigns, so an over-limit body is a 413
fn form_error(err: MultipartError) -> ApiError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::new(status, "Upload too large").with_details(err.body_text())
    } else {
        ApiError::new(status, format!("Invalid form data: {}", err))
    }
}

async fn read_form(mut multipart: Multipart) -> Result<PredictForm, ApiError> {
    let mut form = PredictForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(form_error)?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let bytes = field.bytes().await.map_err(form_error)?;
            form.image = Some(bytes.to_vec());
        } else {
            let text = field.text().await.map_err(form_error)?;
            form.fields.insert(name, text);
        }
    }

    Ok(form)
}

/// One value per column, in column order; every column is required
fn parse_features(
    fields: &HashMap<String, String>,
    columns: &[String],
) -> Result<FeatureVector, ApiError> {
    columns
        .iter()
        .map(|column| {
            let raw = fields.get(column).ok_or_else(|| {
                ApiError::bad_request(format!("Invalid tabular data: missing field '{}'", column))
            })?;
            raw.trim().parse::<f32>().map_err(|e| {
                ApiError::bad_request(format!("Invalid tabular data: {} = {:?}: {}", column, raw, e))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(FeatureVector::new)
}

/// Optional farm area in acres; blank counts as absent
fn parse_area(fields: &HashMap<String, String>) -> Result<f64, ApiError> {
    match fields.get("area").map(|raw| raw.trim()) {
        None | Some("") => Ok(0.0),
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|e| ApiError::bad_request(format!("Invalid tabular data: area = {:?}: {}", raw, e))),
    }
}

fn run_inference(
    predictor: &CropPredictor<InferenceBackend>,
    spec: &ImageSpec,
    bytes: &[u8],
    features: &FeatureVector,
) -> geocrop::Result<Inference> {
    let started = Instant::now();
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| GeoCropError::InvalidImage(format!("Error processing image: {}", e)))?;
    let original_size = (decoded.width(), decoded.height());
    let image = spec.preprocess(&decoded)?;
    let image_ms = elapsed_ms(started);

    let started = Instant::now();
    let prediction = predictor.predict(&image, features)?;
    let inference_ms = elapsed_ms(started);

    Ok(Inference {
        prediction,
        original_size,
        image_ms,
        inference_ms,
    })
}

/// POST /predict - multipart image + soil/weather fields
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let started = Instant::now();
    let mut steps = Vec::new();

    let step_start = Instant::now();
    let form = read_form(multipart).await?;
    let Some(image_bytes) = form.image else {
        return Err(ApiError::bad_request("No image uploaded"));
    };
    step(
        &mut steps,
        "Input Validation",
        elapsed_ms(step_start),
        "Validated image and form data".to_string(),
    );

    let step_start = Instant::now();
    let schema = state.metadata.feature_schema();
    let raw = parse_features(&form.fields, schema.columns())?;
    let features = state.ranges.clamp(&schema, &raw)?;
    let area = parse_area(&form.fields)?;
    step(
        &mut steps,
        "Data Cleaning",
        elapsed_ms(step_start),
        format!("Processed {} parameters, validated ranges", schema.len()),
    );

    let predictor = state.predictor()?;
    let spec = state.metadata.image.clone();
    let model_features = features.clone();
    let inference = tokio::task::spawn_blocking(move || {
        run_inference(&predictor, &spec, &image_bytes, &model_features)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Inference task failed: {}", e)))??;

    let size = state.metadata.image.size;
    let (width, height) = inference.original_size;
    step(
        &mut steps,
        "Image Analysis",
        inference.image_ms,
        format!(
            "Resized from {}x{} to {}x{}, normalized RGB channels",
            width, height, size, size
        ),
    );

    let prediction = inference.prediction;
    let w_img = prediction.gate_weights.image as f64;
    let w_tab = prediction.gate_weights.tabular as f64;
    step(
        &mut steps,
        "Model Inference",
        inference.inference_ms,
        format!(
            "GeoNet prediction with gated fusion (img: {:.2}%, tab: {:.2}%)",
            w_img * 100.0,
            w_tab * 100.0
        ),
    );

    let step_start = Instant::now();
    let crop = prediction.predicted_label.clone();
    let advice = recommendation(&crop, &features, &schema);
    let yield_estimate = YieldEstimate::for_area(&crop, area);
    step(
        &mut steps,
        "Recommendation Generation",
        elapsed_ms(step_start),
        "Generated crop-specific recommendations".to_string(),
    );

    let confidence = prediction.confidence as f64;
    let total_time_ms = elapsed_ms(started);
    info!(
        "Predicted {} ({:.2}%) in {} ms",
        crop,
        confidence * 100.0,
        total_time_ms
    );

    Ok(Json(PredictResponse {
        confidence: format!("{:.2}%", confidence * 100.0),
        confidence_value: round_to(confidence * 100.0, 2),
        w_img: format!("{:.4}", w_img),
        w_tab: format!("{:.4}", w_tab),
        image_weight: round_to(w_img * 100.0, 2),
        tabular_weight: round_to(w_tab * 100.0, 2),
        recommendation: advice,
        top_predictions: prediction
            .top_k(DEFAULT_TOP_K)
            .into_iter()
            .map(|score| TopPrediction {
                crop: score.label,
                probability: score.probability,
            })
            .collect(),
        yield_estimate,
        processing: Processing {
            steps,
            total_time_ms,
        },
        crop,
    }))
}
