//! Error Handling Module
//!
//! Defines the error type shared by the GeoCrop library.
//! Uses thiserror for ergonomic error definitions.
//!
//! Errors fall into three groups:
//! - input validation (bad image, bad feature vector), recoverable by the caller
//! - configuration (checkpoint does not match the network), fatal at load time
//! - numeric (non-finite values reaching or leaving the model)

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for GeoCrop operations
#[derive(Error, Debug)]
pub enum GeoCropError {
    /// Error loading an image file from disk
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Image bytes or raster do not satisfy the encoder's input contract
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Feature vector has the wrong length or contains unusable values
    #[error("Invalid features: {0}")]
    InvalidFeatures(String),

    /// Checkpoint metadata disagrees with the network it describes
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint could not be read or written
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// NaN or infinity detected in model inputs or outputs
    #[error("Numeric error: {0}")]
    Numeric(String),

    /// Error with model operations
    #[error("Model error: {0}")]
    Model(String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl GeoCropError {
    /// Whether the error was caused by caller-supplied input and can be fixed by resubmitting
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            GeoCropError::ImageLoad(..)
                | GeoCropError::InvalidImage(_)
                | GeoCropError::InvalidFeatures(_)
        )
    }

    /// Whether the error means the model must not be served at all
    pub fn is_config_error(&self) -> bool {
        matches!(self, GeoCropError::Config(_) | GeoCropError::Checkpoint(_))
    }
}

impl From<serde_json::Error> for GeoCropError {
    fn from(err: serde_json::Error) -> Self {
        GeoCropError::Serialization(err.to_string())
    }
}

/// Convenience Result type for GeoCrop operations
pub type Result<T> = std::result::Result<T, GeoCropError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| GeoCropError::Model(format!("{}: {}", msg, e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| GeoCropError::Model(msg.to_string()))
    }
}
