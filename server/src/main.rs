//! GeoCrop Server
//!
//! HTTP API for crop prediction from a field image plus soil and weather
//! measurements, with proxies for weather, satellite imagery and a
//! farming chat assistant.

mod chat;
mod error;
mod routes;
mod satellite;
mod state;
mod weather;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use geocrop::backend::{backend_name, default_device, InferenceBackend};
use geocrop::utils::logging::{init_logging, LogConfig};
use geocrop::CropPredictor;

use crate::state::{AppState, ServerConfig, DEFAULT_CORS_ORIGINS, DEFAULT_MAX_UPLOAD_BYTES};

/// GeoCrop Server
#[derive(Parser, Debug)]
#[command(name = "geocrop-server")]
#[command(version)]
#[command(about = "HTTP API server for GeoCrop predictions")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "GEOCROP_PORT", default_value = "5000")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "GEOCROP_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Checkpoint directory
    #[arg(long, env = "GEOCROP_CHECKPOINT", default_value = "output/model")]
    checkpoint: PathBuf,

    /// Images served when Sentinel Hub is unavailable
    #[arg(long, env = "GEOCROP_FALLBACK_IMAGES", default_value = "data/samples")]
    fallback_images: PathBuf,

    #[arg(long, env = "SENTINEL_CLIENT_ID", hide_env_values = true)]
    sentinel_client_id: Option<String>,

    #[arg(long, env = "SENTINEL_CLIENT_SECRET", hide_env_values = true)]
    sentinel_client_secret: Option<String>,

    #[arg(long, env = "OPENWEATHER_API_KEY", hide_env_values = true)]
    openweather_api_key: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Allowed CORS origins, comma-separated (`*` for any)
    #[arg(long, env = "GEOCROP_CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Vec<String>,

    /// Largest accepted request body in bytes
    #[arg(long, env = "GEOCROP_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,

    /// Verbose logging
    #[arg(long, env = "GEOCROP_DEBUG", default_value = "false")]
    debug: bool,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let cors_origins = if self.cors_origins.is_empty() {
            DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect()
        } else {
            self.cors_origins
        };

        ServerConfig {
            checkpoint_dir: self.checkpoint,
            fallback_image_dir: self.fallback_images,
            sentinel_client_id: self.sentinel_client_id,
            sentinel_client_secret: self.sentinel_client_secret,
            openweather_api_key: self.openweather_api_key,
            gemini_api_key: self.gemini_api_key,
            cors_origins,
            max_upload_bytes: self.max_upload_bytes,
            debug: self.debug,
            host: self.host,
            port: self.port,
        }
    }
}

fn warn_missing_services(state: &AppState) {
    if state.sentinel.is_none() {
        warn!("SENTINEL_CLIENT_ID/SENTINEL_CLIENT_SECRET not set; sample images come from {:?}", state.fallback.dir());
    }
    if !state.weather.is_configured() {
        warn!("OPENWEATHER_API_KEY not set; /api/weather is disabled");
    }
    if state.chat.is_none() {
        warn!("GEMINI_API_KEY not set; /api/chat is disabled");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config();

    let log_config = if config.debug {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!("GeoCrop Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Checkpoint:      {:?}", config.checkpoint_dir);
    info!("  Fallback images: {:?}", config.fallback_image_dir);
    info!("  CORS origins:    {}", config.cors_origins.join(", "));
    info!("  Upload limit:    {} bytes", config.max_upload_bytes);
    info!("  Backend:         {}", backend_name());

    let predictor = CropPredictor::<InferenceBackend>::load(&config.checkpoint_dir, default_device())
        .with_context(|| format!("failed to load checkpoint {:?}", config.checkpoint_dir))?;
    info!(
        "Model ready: {} classes ({})",
        predictor.classes().len(),
        predictor.classes().join(", ")
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let state = Arc::new(AppState::new(config, predictor)?);
    warn_missing_services(&state);

    let app = routes::build_router(state);

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
