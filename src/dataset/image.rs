//! Image preprocessing
//!
//! Decodes, resizes and normalizes images into the CHW float layout the
//! backbone expects. The resolution and per-channel statistics live in
//! [`ImageSpec`], which is stored in every checkpoint so that training and
//! every inference entry point use the same preprocessing.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};

use crate::utils::error::{GeoCropError, Result};

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Number of channels the backbone consumes
pub const IMAGE_CHANNELS: usize = 3;

/// Smallest side length that survives the backbone's four 2x2 poolings
pub const MIN_IMAGE_SIZE: u32 = 16;

/// Largest side length a checkpoint may declare
pub const MAX_IMAGE_SIZE: u32 = 1024;

/// Preprocessing contract of a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Square side length images are resized to
    pub size: u32,
    /// Per-channel mean subtracted after scaling to [0, 1]
    pub mean: [f32; 3],
    /// Per-channel std divided by after mean subtraction
    pub std: [f32; 3],
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self::with_size(crate::DEFAULT_IMAGE_SIZE)
    }
}

impl ImageSpec {
    /// ImageNet statistics at the given resolution
    pub fn with_size(size: u32) -> Self {
        Self {
            size,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Check these settings can be applied to the backbone
    pub fn validate(&self) -> Result<()> {
        if !(MIN_IMAGE_SIZE..=MAX_IMAGE_SIZE).contains(&self.size) {
            return Err(GeoCropError::Config(format!(
                "image size must be between {} and {}, got {}",
                MIN_IMAGE_SIZE, MAX_IMAGE_SIZE, self.size
            )));
        }

        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0)
            || self.mean.iter().any(|m| !m.is_finite())
        {
            return Err(GeoCropError::Config(
                "image normalization mean must be finite and std strictly positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Number of floats in one preprocessed image
    pub fn num_values(&self) -> usize {
        IMAGE_CHANNELS * (self.size as usize) * (self.size as usize)
    }

    /// Resize and normalize a decoded image
    ///
    /// Grayscale sources are rejected rather than replicated across channels;
    /// an alpha channel, if present, is dropped.
    pub fn preprocess(&self, image: &DynamicImage) -> Result<PreprocessedImage> {
        let channels = image.color().channel_count();
        if channels < 3 {
            return Err(GeoCropError::InvalidImage(format!(
                "expected an RGB image, got {} channel(s)",
                channels
            )));
        }

        let resized = image
            .resize_exact(self.size, self.size, FilterType::Triangle)
            .to_rgb8();

        let num_pixels = self.size as usize * self.size as usize;
        let mut data = vec![0.0f32; IMAGE_CHANNELS * num_pixels];

        // CHW layout: all R values, then all G values, then all B values
        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..IMAGE_CHANNELS {
                data[c * num_pixels + i] =
                    (pixel[c] as f32 / 255.0 - self.mean[c]) / self.std[c];
            }
        }

        Ok(PreprocessedImage {
            data,
            channels: IMAGE_CHANNELS,
            height: self.size as usize,
            width: self.size as usize,
        })
    }

    /// Decode encoded image bytes (PNG, JPEG, ...) and preprocess them
    pub fn decode(&self, bytes: &[u8]) -> Result<PreprocessedImage> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| GeoCropError::InvalidImage(format!("unreadable image data: {}", e)))?;
        self.preprocess(&image)
    }

    /// Load an image from disk and preprocess it
    pub fn load(&self, path: &Path) -> Result<PreprocessedImage> {
        if !path.exists() {
            return Err(GeoCropError::PathNotFound(path.to_path_buf()));
        }

        let image = ImageReader::open(path)
            .map_err(|e| GeoCropError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .with_guessed_format()
            .map_err(|e| GeoCropError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| GeoCropError::ImageLoad(path.to_path_buf(), e.to_string()))?;

        self.preprocess(&image)
    }
}

/// A normalized image in CHW layout
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedImage {
    data: Vec<f32>,
    channels: usize,
    height: usize,
    width: usize,
}

impl PreprocessedImage {
    /// Wrap an already normalized CHW buffer
    pub fn from_chw(data: Vec<f32>, channels: usize, height: usize, width: usize) -> Result<Self> {
        if data.len() != channels * height * width {
            return Err(GeoCropError::InvalidImage(format!(
                "buffer holds {} values but shape {}x{}x{} needs {}",
                data.len(),
                channels,
                height,
                width,
                channels * height * width
            )));
        }

        Ok(Self {
            data,
            channels,
            height,
            width,
        })
    }

    /// Check the image matches the checkpoint's preprocessing contract
    pub fn validate(&self, spec: &ImageSpec) -> Result<()> {
        if self.channels != IMAGE_CHANNELS {
            return Err(GeoCropError::InvalidImage(format!(
                "expected {} channels, got {}",
                IMAGE_CHANNELS, self.channels
            )));
        }

        let size = spec.size as usize;
        if self.height != size || self.width != size {
            return Err(GeoCropError::InvalidImage(format!(
                "expected {}x{} image, got {}x{}",
                size, size, self.height, self.width
            )));
        }

        if let Some(pos) = self.data.iter().position(|v| !v.is_finite()) {
            return Err(GeoCropError::InvalidImage(format!(
                "non-finite pixel value at index {}",
                pos
            )));
        }

        Ok(())
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }
}
