//! Training data: JSON manifest, Burn dataset and batcher
//!
//! A manifest lists one sample per image:
//!
//! ```json
//! { "samples": [
//!     { "image_path": "fields/0001.png", "crop_label": "Rice",
//!       "features": { "ph": 6.4, "N": 25, "P": 18, "K": 14, "rainfall": 900,
//!                     "temp": 30.1, "lat": 19.1, "lon": 73.8 } }
//! ] }
//! ```
//!
//! Image paths are resolved relative to the manifest's directory. Classes are
//! the sorted unique labels, so the same manifest always yields the same
//! class order.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::features::FeatureSchema;
use super::image::{ImageSpec, IMAGE_CHANNELS};
use crate::utils::error::{GeoCropError, Result};

/// One manifest entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropSample {
    pub image_path: PathBuf,
    pub crop_label: String,
    pub features: HashMap<String, f32>,
}

/// Parsed training manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropManifest {
    pub samples: Vec<CropSample>,
    /// Directory image paths are relative to
    #[serde(skip)]
    pub root: PathBuf,
}

impl CropManifest {
    /// Read a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GeoCropError::PathNotFound(path.to_path_buf()));
        }

        let json = std::fs::read_to_string(path)?;
        let mut manifest: Self = serde_json::from_str(&json)
            .map_err(|e| GeoCropError::Dataset(format!("invalid manifest {:?}: {}", path, e)))?;

        if manifest.samples.is_empty() {
            return Err(GeoCropError::Dataset(format!(
                "manifest {:?} contains no samples",
                path
            )));
        }

        manifest.root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok(manifest)
    }

    /// Sorted unique crop labels
    pub fn classes(&self) -> Vec<String> {
        self.samples
            .iter()
            .map(|s| s.crop_label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Resolve a sample's image path against the manifest directory
    pub fn resolve(&self, sample: &CropSample) -> PathBuf {
        if sample.image_path.is_absolute() {
            sample.image_path.clone()
        } else {
            self.root.join(&sample.image_path)
        }
    }

    /// Per-class sample counts, in `classes()` order
    pub fn class_distribution(&self) -> Vec<(String, usize)> {
        self.classes()
            .into_iter()
            .map(|class| {
                let count = self
                    .samples
                    .iter()
                    .filter(|s| s.crop_label == class)
                    .count();
                (class, count)
            })
            .collect()
    }
}

/// A preprocessed sample ready for batching
#[derive(Clone, Debug)]
pub struct CropItem {
    /// Normalized CHW image
    pub image: Vec<f32>,
    /// Features in schema order
    pub features: Vec<f32>,
    /// Index into the class list
    pub label: usize,
}

/// In-memory dataset of preprocessed samples
#[derive(Clone, Debug)]
pub struct CropDataset {
    items: Vec<CropItem>,
}

impl CropDataset {
    pub fn new(items: Vec<CropItem>) -> Self {
        Self { items }
    }

    /// Preprocess every manifest sample
    ///
    /// Samples whose image fails to load are skipped with a warning; a sample
    /// with a missing or non-finite feature is a hard error since it points
    /// at a broken manifest rather than a bad file.
    pub fn from_manifest(
        manifest: &CropManifest,
        classes: &[String],
        schema: &FeatureSchema,
        spec: &ImageSpec,
    ) -> Result<Self> {
        let mut items = Vec::with_capacity(manifest.samples.len());

        for sample in &manifest.samples {
            let label = classes
                .iter()
                .position(|c| *c == sample.crop_label)
                .ok_or_else(|| {
                    GeoCropError::Dataset(format!("unknown crop label '{}'", sample.crop_label))
                })?;

            let features = schema.vector_from_named(&sample.features).map_err(|e| {
                GeoCropError::Dataset(format!("{:?}: {}", sample.image_path, e))
            })?;

            let path = manifest.resolve(sample);
            let image = match spec.load(&path) {
                Ok(image) => image,
                Err(e) => {
                    warn!("Skipping {:?}: {}", path, e);
                    continue;
                }
            };

            items.push(CropItem {
                image: image.into_data(),
                features: features.values().to_vec(),
                label,
            });
        }

        if items.is_empty() {
            return Err(GeoCropError::Dataset(
                "no manifest sample could be loaded".to_string(),
            ));
        }

        info!(
            "Loaded {} of {} samples",
            items.len(),
            manifest.samples.len()
        );

        Ok(Self { items })
    }

    /// Deterministically shuffle and split into (train, validation)
    ///
    /// The validation part gets `round(len * fraction)` items, but never all
    /// of them: at least one sample always stays in the training part.
    pub fn split(self, validation_fraction: f64, seed: u64) -> Result<(Self, Self)> {
        if !(0.0..1.0).contains(&validation_fraction) {
            return Err(GeoCropError::Config(format!(
                "validation fraction must be in [0, 1), got {}",
                validation_fraction
            )));
        }

        let mut items = self.items;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        items.shuffle(&mut rng);

        let total = items.len();
        let n_val = ((total as f64) * validation_fraction).round() as usize;
        let n_val = n_val.min(total.saturating_sub(1));

        let val = items.split_off(total - n_val);
        Ok((Self { items }, Self { items: val }))
    }

    pub fn items(&self) -> &[CropItem] {
        &self.items
    }
}

impl Dataset<CropItem> for CropDataset {
    fn get(&self, index: usize) -> Option<CropItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of samples for training
#[derive(Clone, Debug)]
pub struct CropBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Features with shape [batch_size, num_features]
    pub features: Tensor<B, 2>,
    /// Class indices with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks already-normalized items into tensors
#[derive(Clone, Debug)]
pub struct CropBatcher {
    image_size: usize,
    num_features: usize,
}

impl CropBatcher {
    pub fn new(image_size: usize, num_features: usize) -> Self {
        Self {
            image_size,
            num_features,
        }
    }
}

impl<B: Backend> Batcher<B, CropItem, CropBatch<B>> for CropBatcher {
    fn batch(&self, items: Vec<CropItem>, device: &B::Device) -> CropBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.clone()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(
                images_data,
                [batch_size, IMAGE_CHANNELS, self.image_size, self.image_size],
            ),
            device,
        );

        let features_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.features.clone())
            .collect();
        let features = Tensor::<B, 2>::from_floats(
            TensorData::new(features_data, [batch_size, self.num_features]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        CropBatch {
            images,
            features,
            targets,
        }
    }
}
