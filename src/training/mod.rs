//! Training module
//!
//! A supervised loop over a JSON manifest: Adam + cross-entropy on the
//! fused logits, accuracy tracked on a held-out split, and the best epoch
//! written out as a checkpoint directory.

pub mod supervised;

use serde::{Deserialize, Serialize};

use crate::utils::error::{GeoCropError, Result};

pub use supervised::{run_training, run_training_from, TrainingReport};

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 10;

/// Default batch size
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 1e-3;

/// Default held-out fraction
pub const DEFAULT_VALIDATION_FRACTION: f64 = 0.2;

/// Hyperparameters for one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Fraction of samples held out for validation
    pub validation_fraction: f64,
    /// Seed for the split and per-epoch shuffles
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            validation_fraction: DEFAULT_VALIDATION_FRACTION,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Small, fast settings for smoke tests
    pub fn debug() -> Self {
        Self {
            epochs: 2,
            batch_size: 4,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(GeoCropError::Config("epochs must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(GeoCropError::Config("batch_size must be > 0".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(GeoCropError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(GeoCropError::Config(format!(
                "validation_fraction must be in [0, 1), got {}",
                self.validation_fraction
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrainingConfig::default().validate().is_ok());
        assert!(TrainingConfig::debug().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = TrainingConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.validation_fraction = 1.0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.learning_rate = f64::NAN;
        assert!(config.validate().is_err());
    }
}
