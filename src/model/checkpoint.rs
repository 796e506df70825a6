//! Checkpoint persistence
//!
//! A checkpoint is a directory:
//!
//! ```text
//! checkpoint_dir/
//! ├── checkpoint.json   # CheckpointMetadata (network config, class/column order, image spec)
//! └── weights.mpk       # full-precision MessagePack record of GeoNet
//! ```
//!
//! Loading validates the metadata against itself and then against the
//! widths of the loaded tensors, so a mismatched checkpoint is rejected
//! before any request is served.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::config::GeoNetConfig;
use super::geonet::GeoNet;
use crate::dataset::features::FeatureSchema;
use crate::dataset::image::ImageSpec;
use crate::utils::error::{GeoCropError, Result};

/// File holding the JSON metadata
pub const METADATA_FILE: &str = "checkpoint.json";

/// Record name handed to the recorder (it appends `.mpk`)
pub const WEIGHTS_FILE: &str = "weights";

/// Weights are stored as f32; a reloaded model reproduces the saved model's
/// outputs bit for bit
type WeightsRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Everything besides the weights needed to rebuild and use a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Network widths the weights were created with
    pub model: GeoNetConfig,
    /// Class labels, in classifier output order
    pub crop_classes: Vec<String>,
    /// Tabular feature columns, in encoder input order
    pub tab_columns: Vec<String>,
    /// Image preprocessing the backbone was trained with
    pub image: ImageSpec,
    /// RFC 3339 creation timestamp
    #[serde(default)]
    pub created_at: Option<String>,
}

impl CheckpointMetadata {
    /// Build metadata whose network widths follow the class and column lists
    pub fn new(
        crop_classes: Vec<String>,
        tab_columns: Vec<String>,
        image: ImageSpec,
        base: GeoNetConfig,
    ) -> Self {
        let model = base
            .with_num_classes(crop_classes.len())
            .with_num_tabular_features(tab_columns.len());

        Self {
            model,
            crop_classes,
            tab_columns,
            image,
            created_at: Some(Utc::now().to_rfc3339()),
        }
    }

    /// Check the metadata is internally consistent
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.image.validate()?;

        validate_names("crop_classes", &self.crop_classes)?;
        validate_names("tab_columns", &self.tab_columns)?;

        if self.tab_columns.len() != self.model.num_tabular_features {
            return Err(GeoCropError::Config(format!(
                "checkpoint lists {} tab_columns but the tabular encoder takes {} features",
                self.tab_columns.len(),
                self.model.num_tabular_features
            )));
        }

        if self.crop_classes.len() != self.model.num_classes {
            return Err(GeoCropError::Config(format!(
                "checkpoint lists {} crop_classes but the classifier head has {} outputs",
                self.crop_classes.len(),
                self.model.num_classes
            )));
        }

        Ok(())
    }

    /// Check a model's actual tensor widths agree with this metadata
    pub fn verify_model<B: Backend>(&self, model: &GeoNet<B>) -> Result<()> {
        let tab_width = model.tabular_input_width();
        if tab_width != self.tab_columns.len() {
            return Err(GeoCropError::Config(format!(
                "tabular encoder weights take {} features but checkpoint lists {} tab_columns",
                tab_width,
                self.tab_columns.len()
            )));
        }

        let out_width = model.output_width();
        if out_width != self.crop_classes.len() {
            return Err(GeoCropError::Config(format!(
                "classifier weights produce {} outputs but checkpoint lists {} crop_classes",
                out_width,
                self.crop_classes.len()
            )));
        }

        let emb_width = model.image_embedding_width();
        if emb_width != self.model.image_embedding_dim() {
            return Err(GeoCropError::Config(format!(
                "image projection expects {}-dim backbone features but config implies {}",
                emb_width,
                self.model.image_embedding_dim()
            )));
        }

        Ok(())
    }

    /// Feature schema for this checkpoint
    pub fn feature_schema(&self) -> FeatureSchema {
        FeatureSchema::new(self.tab_columns.clone())
    }

    /// Read and validate metadata from a checkpoint directory
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        if !path.exists() {
            return Err(GeoCropError::PathNotFound(path));
        }

        let json = std::fs::read_to_string(&path)?;
        let metadata: Self = serde_json::from_str(&json).map_err(|e| {
            GeoCropError::Checkpoint(format!("invalid metadata in {:?}: {}", path, e))
        })?;

        metadata.validate()?;
        Ok(metadata)
    }

    /// Write the metadata as pretty JSON
    pub fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(METADATA_FILE), json)?;
        Ok(())
    }
}

fn validate_names(field: &str, names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(GeoCropError::Config(format!("{} must not be empty", field)));
    }

    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(GeoCropError::Config(format!(
                "{} contains an empty name",
                field
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(GeoCropError::Config(format!(
                "{} contains duplicate name '{}'",
                field, name
            )));
        }
    }

    Ok(())
}

/// A validated model together with its metadata
#[derive(Debug, Clone)]
pub struct Checkpoint<B: Backend> {
    pub model: GeoNet<B>,
    pub metadata: CheckpointMetadata,
}

impl<B: Backend> Checkpoint<B> {
    /// Pair a model with metadata, validating both
    pub fn new(model: GeoNet<B>, metadata: CheckpointMetadata) -> Result<Self> {
        metadata.validate()?;
        metadata.verify_model(&model)?;
        Ok(Self { model, metadata })
    }

    /// Freshly initialized weights for the given metadata
    pub fn init(metadata: CheckpointMetadata, device: &B::Device) -> Result<Self> {
        metadata.validate()?;
        let model = metadata.model.init::<B>(device);
        Self::new(model, metadata)
    }

    /// Load and validate a checkpoint directory
    pub fn load(dir: &Path, device: &B::Device) -> Result<Self> {
        let metadata = CheckpointMetadata::load(dir)?;

        let weights_path = dir.join(WEIGHTS_FILE);
        let model = metadata
            .model
            .init::<B>(device)
            .load_file(weights_path.clone(), &WeightsRecorder::new(), device)
            .map_err(|e| {
                GeoCropError::Checkpoint(format!(
                    "failed to load weights from {:?}: {:?}",
                    weights_path, e
                ))
            })?;

        let checkpoint = Self::new(model, metadata)?;

        info!(
            "Loaded checkpoint {:?}: {} classes, {} tabular features, {}x{} images",
            dir,
            checkpoint.metadata.crop_classes.len(),
            checkpoint.metadata.tab_columns.len(),
            checkpoint.metadata.image.size,
            checkpoint.metadata.image.size
        );

        Ok(checkpoint)
    }

    /// Write metadata and weights into `dir`, creating it if needed
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        self.metadata.save(dir)?;

        let weights_path = dir.join(WEIGHTS_FILE);
        self.model
            .clone()
            .save_file(weights_path.clone(), &WeightsRecorder::new())
            .map_err(|e| {
                GeoCropError::Checkpoint(format!(
                    "failed to save weights to {:?}: {:?}",
                    weights_path, e
                ))
            })?;

        info!("Saved checkpoint to {:?}", dir);
        Ok(dir.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn metadata() -> CheckpointMetadata {
        CheckpointMetadata::new(
            vec!["Wheat".into(), "Rice".into(), "Maize".into()],
            FeatureSchema::default().columns().to_vec(),
            ImageSpec::with_size(16),
            GeoNetConfig::new().with_base_filters(2).with_fusion_dim(8),
        )
    }

    #[test]
    fn test_new_metadata_is_consistent() {
        let meta = metadata();
        assert_eq!(meta.model.num_classes, 3);
        assert_eq!(meta.model.num_tabular_features, 8);
        assert!(meta.validate().is_ok());
    }

    #[test]
    fn test_cardinality_mismatch_is_config_error() {
        let mut meta = metadata();
        meta.tab_columns.pop();
        assert!(matches!(meta.validate(), Err(GeoCropError::Config(_))));

        let mut meta = metadata();
        meta.crop_classes.push("Forest".into());
        assert!(matches!(meta.validate(), Err(GeoCropError::Config(_))));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut meta = metadata();
        meta.crop_classes[2] = "Wheat".into();
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_verify_model_catches_foreign_weights() {
        let device = Default::default();
        let meta = metadata();
        let other = meta.model.clone().with_num_classes(4).init::<TestBackend>(&device);

        let err = Checkpoint::new(other, meta).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_load_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = CheckpointMetadata::load(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, GeoCropError::PathNotFound(_)));
    }
}
