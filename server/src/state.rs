//! Application state for the GeoCrop server
//!
//! Holds the loaded predictor and the optional upstream service clients.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use geocrop::backend::InferenceBackend;
use geocrop::{CheckpointMetadata, CropPredictor, FeatureRanges, GeoCropError};

use crate::chat::GeminiClient;
use crate::satellite::{FallbackImages, SentinelClient};
use crate::weather::WeatherService;

/// Frontend dev servers allowed by default
pub const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://localhost:5174"];

/// Largest request body accepted, which bounds `/predict` uploads
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Checkpoint directory loaded at startup
    pub checkpoint_dir: PathBuf,
    /// Images served by `/get_sample_image` when Sentinel Hub is unavailable
    pub fallback_image_dir: PathBuf,
    pub sentinel_client_id: Option<String>,
    pub sentinel_client_secret: Option<String>,
    pub openweather_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    /// Allowed origins; `*` allows any
    pub cors_origins: Vec<String>,
    /// Request bodies over this size are rejected with 413
    pub max_upload_bytes: usize,
    pub debug: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("output/model"),
            fallback_image_dir: PathBuf::from("data/samples"),
            sentinel_client_id: None,
            sentinel_client_secret: None,
            openweather_api_key: None,
            gemini_api_key: None,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            debug: false,
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    /// Burn modules are not `Sync`, so requests take a clone of this
    /// predictor and run it outside the lock
    predictor: Mutex<CropPredictor<InferenceBackend>>,
    /// Copy of the predictor's metadata, readable without the lock
    pub metadata: CheckpointMetadata,
    pub ranges: FeatureRanges,
    pub weather: WeatherService,
    pub chat: Option<GeminiClient>,
    pub sentinel: Option<SentinelClient>,
    pub fallback: FallbackImages,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        predictor: CropPredictor<InferenceBackend>,
    ) -> anyhow::Result<Self> {
        let metadata = predictor.metadata().clone();
        let weather = WeatherService::new(config.openweather_api_key.clone())?;
        let chat = GeminiClient::new(config.gemini_api_key.clone())?;
        let sentinel = SentinelClient::new(
            config.sentinel_client_id.clone(),
            config.sentinel_client_secret.clone(),
        )?;
        let fallback = FallbackImages::new(&config.fallback_image_dir);

        Ok(Self {
            config,
            predictor: Mutex::new(predictor),
            metadata,
            ranges: FeatureRanges::default(),
            weather,
            chat,
            sentinel,
            fallback,
            started_at: Instant::now(),
        })
    }

    /// A private predictor for one request; the lock is held only to clone
    pub fn predictor(&self) -> geocrop::Result<CropPredictor<InferenceBackend>> {
        self.predictor
            .lock()
            .map(|predictor| predictor.clone())
            .map_err(|_| GeoCropError::Model("predictor lock poisoned".to_string()))
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
