//! # GeoCrop
//!
//! Crop-type prediction from a field/satellite image plus soil and weather
//! measurements, built on the Burn framework.
//!
//! ## Features
//!
//! - **Gated fusion**: a small CNN over the image and an MLP over the tabular
//!   features, mixed per example by a learned softmax gate
//! - **Self-describing checkpoints**: class order, feature order and image
//!   preprocessing are stored next to the weights and validated at load
//! - **Burn framework** with a CPU (NdArray) default and an optional CUDA backend
//!
//! ## Modules
//!
//! - `dataset`: Image preprocessing, feature schema, training manifest
//! - `model`: GeoNet architecture, configuration and checkpoints
//! - `training`: Supervised training loop
//! - `inference`: Prediction, top-K, recommendation text and yield estimate
//! - `utils`: Errors, logging and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use geocrop::{CropPredictor, FeatureVector};
//! use geocrop::backend::{default_device, InferenceBackend};
//!
//! let predictor = CropPredictor::<InferenceBackend>::load("output/model".as_ref(), default_device())?;
//! let image = predictor.image_spec().load("field.png".as_ref())?;
//! let features = FeatureVector::new(vec![6.4, 25.0, 18.0, 14.0, 900.0, 30.1, 19.10, 73.80]);
//!
//! let prediction = predictor.predict(&image, &features)?;
//! println!("{} ({:.2}%)", prediction.predicted_label, prediction.confidence * 100.0);
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{
    CropBatch, CropBatcher, CropDataset, CropManifest, FeatureRanges, FeatureSchema,
    FeatureVector, ImageSpec, PreprocessedImage,
};
pub use inference::{ClassScore, CropPredictor, GateWeights, Prediction, YieldEstimate};
pub use model::{Checkpoint, CheckpointMetadata, GeoNet, GeoNetConfig};
pub use training::{run_training, run_training_from, TrainingConfig, TrainingReport};
pub use utils::error::{GeoCropError, Result};

/// Default square image size for new checkpoints
pub const DEFAULT_IMAGE_SIZE: u32 = 64;

/// Number of ranked classes reported by default
pub const DEFAULT_TOP_K: usize = 3;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
