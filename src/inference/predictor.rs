//! Crop predictor
//!
//! Wraps a loaded [`GeoNet`] with the metadata it was trained under and
//! turns one or more (image, features) pairs into [`Prediction`]s. Softmax is
//! applied here and nowhere else; the model itself returns logits.

use std::cmp::Ordering;
use std::path::Path;
use std::time::Instant;

use burn::prelude::*;
use burn::tensor::activation::softmax;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::features::{FeatureSchema, FeatureVector};
use crate::dataset::image::{ImageSpec, PreprocessedImage, IMAGE_CHANNELS};
use crate::model::checkpoint::{Checkpoint, CheckpointMetadata};
use crate::model::geonet::GeoNet;
use crate::utils::error::{GeoCropError, Result, ResultExt};

/// Mixture weights the gate assigned to each modality
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateWeights {
    pub image: f32,
    pub tabular: f32,
}

/// Probability of one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub label: String,
    pub probability: f32,
}

/// Result of a single prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Label of the most probable class
    pub predicted_label: String,
    /// Index of the most probable class (lowest index wins ties)
    pub predicted_index: usize,
    /// Probability of the predicted class
    pub confidence: f32,
    /// Every class, in checkpoint order
    pub class_scores: Vec<ClassScore>,
    /// Gate output for this sample
    pub gate_weights: GateWeights,
}

impl Prediction {
    fn from_probabilities(
        probabilities: &[f32],
        classes: &[String],
        gate_weights: GateWeights,
    ) -> Self {
        let mut predicted_index = 0;
        for (i, &p) in probabilities.iter().enumerate() {
            if p > probabilities[predicted_index] {
                predicted_index = i;
            }
        }

        let class_scores = classes
            .iter()
            .zip(probabilities)
            .map(|(label, &probability)| ClassScore {
                label: label.clone(),
                probability,
            })
            .collect();

        Self {
            predicted_label: classes[predicted_index].clone(),
            predicted_index,
            confidence: probabilities[predicted_index],
            class_scores,
            gate_weights,
        }
    }

    /// The `k` most probable classes, highest first
    ///
    /// Returns `min(k, num_classes)` entries; equal probabilities keep
    /// checkpoint order.
    pub fn top_k(&self, k: usize) -> Vec<ClassScore> {
        let mut scores = self.class_scores.clone();
        scores.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(Ordering::Equal)
        });
        scores.truncate(k);
        scores
    }

    /// Human-readable summary
    pub fn display(&self, top_k: usize) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "Prediction: {} (class {})\n",
            self.predicted_label, self.predicted_index
        ));
        output.push_str(&format!("Confidence: {:.2}%\n", self.confidence * 100.0));
        output.push_str(&format!(
            "Gate: image {:.2}%, tabular {:.2}%\n",
            self.gate_weights.image * 100.0,
            self.gate_weights.tabular * 100.0
        ));

        output.push_str(&format!("\nTop-{} predictions:\n", top_k));
        for (i, score) in self.top_k(top_k).iter().enumerate() {
            output.push_str(&format!(
                "  {}. {} - {:.2}%\n",
                i + 1,
                score.label,
                score.probability * 100.0
            ));
        }

        output
    }
}

/// Runs inference with a validated checkpoint
///
/// Weights are never mutated after construction; every method takes `&self`.
/// Clones share tensor storage, so a copy per worker thread is cheap.
#[derive(Debug)]
pub struct CropPredictor<B: Backend> {
    model: GeoNet<B>,
    metadata: CheckpointMetadata,
    schema: FeatureSchema,
    device: B::Device,
}

impl<B: Backend> Clone for CropPredictor<B> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            metadata: self.metadata.clone(),
            schema: self.schema.clone(),
            device: self.device.clone(),
        }
    }
}

impl<B: Backend> CropPredictor<B> {
    /// Build a predictor from an already validated checkpoint
    pub fn from_checkpoint(checkpoint: Checkpoint<B>, device: B::Device) -> Self {
        let schema = checkpoint.metadata.feature_schema();
        Self {
            model: checkpoint.model,
            metadata: checkpoint.metadata,
            schema,
            device,
        }
    }

    /// Load a checkpoint directory
    pub fn load(dir: &Path, device: B::Device) -> Result<Self> {
        let checkpoint = Checkpoint::<B>::load(dir, &device)?;
        Ok(Self::from_checkpoint(checkpoint, device))
    }

    pub fn metadata(&self) -> &CheckpointMetadata {
        &self.metadata
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn image_spec(&self) -> &ImageSpec {
        &self.metadata.image
    }

    pub fn classes(&self) -> &[String] {
        &self.metadata.crop_classes
    }

    /// Predict a single sample
    pub fn predict(&self, image: &PreprocessedImage, features: &FeatureVector) -> Result<Prediction> {
        self.predict_batch(&[(image, features)])?
            .pop()
            .context("empty prediction batch")
    }

    /// Predict several samples in one forward pass
    ///
    /// Every sample is validated before any tensor is built. Output `i`
    /// depends only on input `i`.
    pub fn predict_batch(
        &self,
        samples: &[(&PreprocessedImage, &FeatureVector)],
    ) -> Result<Vec<Prediction>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        for (image, features) in samples {
            image.validate(&self.metadata.image)?;
            self.schema.validate(features)?;
        }

        let start = Instant::now();
        let batch_size = samples.len();
        let size = self.metadata.image.size as usize;
        let num_features = self.schema.len();

        let image_data: Vec<f32> = samples
            .iter()
            .flat_map(|(image, _)| image.data().iter().copied())
            .collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(image_data, [batch_size, IMAGE_CHANNELS, size, size]),
            &self.device,
        );

        let feature_data: Vec<f32> = samples
            .iter()
            .flat_map(|(_, features)| features.values().iter().copied())
            .collect();
        let features = Tensor::<B, 2>::from_floats(
            TensorData::new(feature_data, [batch_size, num_features]),
            &self.device,
        );

        let output = self.model.forward(images, features);

        let logits = to_vec(output.logits.clone())?;
        ensure_finite("logits", &logits)?;

        let gate = to_vec(output.gate_weights)?;
        ensure_finite("gate weights", &gate)?;

        let probabilities = to_vec(softmax(output.logits, 1))?;
        ensure_finite("probabilities", &probabilities)?;

        let num_classes = self.metadata.crop_classes.len();
        let predictions = probabilities
            .chunks(num_classes)
            .zip(gate.chunks(2))
            .map(|(probs, gate)| {
                Prediction::from_probabilities(
                    probs,
                    &self.metadata.crop_classes,
                    GateWeights {
                        image: gate[0],
                        tabular: gate[1],
                    },
                )
            })
            .collect();

        debug!(
            "Predicted {} sample(s) in {:.2} ms",
            batch_size,
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(predictions)
    }

    /// Load an image file and predict it with the given features
    pub fn predict_path(&self, path: &Path, features: &FeatureVector) -> Result<Prediction> {
        let image = self.metadata.image.load(path)?;
        self.predict(&image, features)
    }
}

fn to_vec<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| GeoCropError::Model(format!("failed to read tensor data: {:?}", e)))
}

fn ensure_finite(what: &str, values: &[f32]) -> Result<()> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(GeoCropError::Numeric(format!(
            "model produced non-finite {}",
            what
        )));
    }
    Ok(())
}
