//! Inference module
//!
//! This module provides:
//! - Single and batch prediction with a validated checkpoint
//! - Top-K ranking and gate weights per sample
//! - Crop recommendation text and yield estimates

pub mod predictor;
pub mod recommendation;

// Re-export main types for convenience
pub use predictor::{ClassScore, CropPredictor, GateWeights, Prediction};
pub use recommendation::{recommendation, yield_per_acre, YieldEstimate};
