//! Dataset and preprocessing
//!
//! - `image`: decode, resize and normalize images per the checkpoint's [`ImageSpec`]
//! - `features`: tabular feature schema, validation and range clamping
//! - `manifest`: JSON training manifest, Burn dataset and batcher

pub mod features;
pub mod image;
pub mod manifest;

pub use self::features::{FeatureRanges, FeatureSchema, FeatureVector, DEFAULT_TAB_COLUMNS};
pub use self::image::{ImageSpec, PreprocessedImage};
pub use self::manifest::{CropBatch, CropBatcher, CropDataset, CropItem, CropManifest, CropSample};
