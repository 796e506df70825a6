//! Model module for the gated image + tabular fusion network
//!
//! This module provides:
//! - The convolutional image backbone
//! - The tabular encoder, projections, gate network and classifier head
//! - Model configuration and checkpoint persistence
//!
//! ## Architecture
//!
//! ```text
//! image ──► backbone ──► image projection ──┐
//!                                           ├─► gate (softmax over 2) ──► w_img, w_tab
//! features ► tabular MLP ► tab projection ──┘
//!
//! fused = w_img * image_proj + w_tab * tab_proj ──► classifier head ──► logits
//! ```

pub mod backbone;
pub mod checkpoint;
pub mod config;
pub mod geonet;

// Re-export main types for convenience
pub use checkpoint::{Checkpoint, CheckpointMetadata};
pub use config::GeoNetConfig;
pub use geonet::{GeoNet, GeoNetOutput};

/// Number of convolutional blocks in the image backbone
pub const BACKBONE_BLOCKS: usize = 4;

/// Hidden width of the tabular encoder
pub const TABULAR_HIDDEN: usize = 64;

/// Output width of the tabular encoder
pub const TABULAR_EMBEDDING_DIM: usize = 32;

/// Hidden width of the gate network
pub const GATE_HIDDEN: usize = 16;

/// Hidden width of the classifier head
pub const CLASSIFIER_HIDDEN: usize = 32;
