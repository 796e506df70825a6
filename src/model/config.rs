//! Model Configuration Module
//!
//! Structural hyperparameters of the gated fusion network. The config is
//! persisted inside every checkpoint so a loaded model is rebuilt with
//! exactly the widths its weights were trained with.

use burn::{config::Config, tensor::backend::Backend};

use super::geonet::GeoNet;
use super::{
    BACKBONE_BLOCKS, CLASSIFIER_HIDDEN, GATE_HIDDEN, TABULAR_EMBEDDING_DIM, TABULAR_HIDDEN,
};
use crate::utils::error::GeoCropError;

/// Configuration for the GeoNet gated fusion model
#[derive(Config, Debug)]
pub struct GeoNetConfig {
    /// Number of crop classes (width of the classifier head)
    #[config(default = "3")]
    pub num_classes: usize,

    /// Number of tabular features (width of the tabular encoder input)
    #[config(default = "8")]
    pub num_tabular_features: usize,

    /// Number of input image channels (RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters in the first backbone block; doubled in every following block
    #[config(default = "32")]
    pub base_filters: usize,

    /// Shared width both modality embeddings are projected into
    #[config(default = "64")]
    pub fusion_dim: usize,
}

impl GeoNetConfig {
    /// Width of the pooled backbone features
    pub fn image_embedding_dim(&self) -> usize {
        self.base_filters << (BACKBONE_BLOCKS - 1)
    }

    /// Width of the tabular encoder output
    pub fn tabular_embedding_dim(&self) -> usize {
        TABULAR_EMBEDDING_DIM
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::utils::error::Result<()> {
        if self.num_classes == 0 {
            return Err(GeoCropError::Config(
                "num_classes must be greater than 0".to_string(),
            ));
        }

        if self.num_tabular_features == 0 {
            return Err(GeoCropError::Config(
                "num_tabular_features must be greater than 0".to_string(),
            ));
        }

        if self.in_channels != 3 {
            return Err(GeoCropError::Config(format!(
                "in_channels must be 3 (RGB), got {}",
                self.in_channels
            )));
        }

        if self.base_filters == 0 || self.fusion_dim == 0 {
            return Err(GeoCropError::Config(
                "base_filters and fusion_dim must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build a freshly initialized model on `device`
    pub fn init<B: Backend>(&self, device: &B::Device) -> GeoNet<B> {
        GeoNet::new(self, device)
    }

    /// Human-readable layer summary
    pub fn describe(&self) -> String {
        format!(
            "backbone {}->{} | tabular {}->{}->{} | fusion {} | gate {}->{}->2 | head {}->{}->{}",
            self.in_channels,
            self.image_embedding_dim(),
            self.num_tabular_features,
            TABULAR_HIDDEN,
            TABULAR_EMBEDDING_DIM,
            self.fusion_dim,
            self.fusion_dim * 2,
            GATE_HIDDEN,
            self.fusion_dim,
            CLASSIFIER_HIDDEN,
            self.num_classes
        )
    }
}
