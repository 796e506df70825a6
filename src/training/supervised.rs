//! Supervised training loop
//!
//! A plain loop over Burn's autodiff API rather than the high-level
//! `LearnerBuilder`: shuffle, batch, forward, cross-entropy, backward, Adam.

use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::TrainingConfig;
use crate::dataset::image::ImageSpec;
use crate::dataset::manifest::{CropBatch, CropBatcher, CropDataset, CropManifest};
use crate::model::checkpoint::{Checkpoint, CheckpointMetadata};
use crate::model::config::GeoNetConfig;
use crate::model::geonet::GeoNet;
use crate::utils::error::{GeoCropError, Result};
use crate::utils::logging::TrainingLogger;

/// Outcome of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub checkpoint_dir: PathBuf,
    pub crop_classes: Vec<String>,
    /// Feature columns the model reads, in input order
    pub tab_columns: Vec<String>,
    pub train_samples: usize,
    pub validation_samples: usize,
    /// 0-indexed epoch whose weights were saved
    pub best_epoch: usize,
    /// Validation accuracy of the saved epoch, if a validation split exists
    pub best_val_accuracy: Option<f64>,
    /// Mean training loss per epoch
    pub train_losses: Vec<f64>,
}

/// Train a model from a manifest and write the best epoch as a checkpoint
///
/// # Type Parameters
/// * `B` - The autodiff backend to use (e.g., `Autodiff<NdArray>`)
///
/// # Arguments
/// * `manifest_path` - JSON manifest listing images, labels and features
/// * `output_dir` - Checkpoint directory to create
/// * `config` - Loop hyperparameters
/// * `tab_columns` - Feature columns read from each sample, in encoder input order
/// * `model_config` - Network widths; class and feature counts are taken from the data
/// * `image` - Preprocessing stored in the checkpoint and applied to every sample
pub fn run_training<B: AutodiffBackend>(
    manifest_path: &Path,
    output_dir: &Path,
    config: &TrainingConfig,
    tab_columns: Vec<String>,
    model_config: GeoNetConfig,
    image: ImageSpec,
    device: &B::Device,
) -> Result<TrainingReport> {
    config.validate()?;
    image.validate()?;

    let manifest = CropManifest::load(manifest_path)?;
    let classes = manifest.classes();

    info!(
        "Manifest {:?}: {} samples, classes {:?}",
        manifest_path,
        manifest.samples.len(),
        classes
    );
    for (class, count) in manifest.class_distribution() {
        debug!("  {}: {} samples", class, count);
    }

    let metadata = CheckpointMetadata::new(classes.clone(), tab_columns, image.clone(), model_config);
    metadata.validate()?;
    let schema = metadata.feature_schema();

    let dataset = CropDataset::from_manifest(&manifest, &classes, &schema, &image)?;
    let (train_dataset, val_dataset) = dataset.split(config.validation_fraction, config.seed)?;

    info!(
        "Training samples: {} | Validation samples: {}",
        train_dataset.len(),
        val_dataset.len()
    );
    info!("Model: {}", metadata.model.describe());

    let batcher = CropBatcher::new(image.size as usize, schema.len());
    B::seed(config.seed);
    let mut model: GeoNet<B> = metadata.model.init(device);
    let mut optimizer = AdamConfig::new().init();
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut logger = TrainingLogger::new(config.epochs);
    let mut epoch_rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut train_losses = Vec::with_capacity(config.epochs);
    let mut best: Option<(usize, Option<f64>, GeoNet<B::InnerBackend>)> = None;

    for epoch in 0..config.epochs {
        logger.start_epoch(epoch);

        let mut indices: Vec<usize> = (0..train_dataset.len()).collect();
        indices.shuffle(&mut epoch_rng);

        let mut epoch_loss = 0.0f64;
        let mut num_batches = 0usize;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for chunk in indices.chunks(config.batch_size) {
            let items: Vec<_> = chunk.iter().filter_map(|&i| train_dataset.get(i)).collect();
            if items.is_empty() {
                continue;
            }

            let batch: CropBatch<B> = batcher.batch(items, device);
            let batch_size = batch.targets.dims()[0];

            let output = model.forward(batch.images, batch.features);
            let loss = loss_fn.forward(output.logits.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(GeoCropError::Training(format!(
                    "loss became non-finite in epoch {}",
                    epoch + 1
                )));
            }
            epoch_loss += loss_value;
            num_batches += 1;

            correct += count_correct(output.logits, batch.targets, batch_size);
            seen += batch_size;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.learning_rate, model, grads);

            debug!("Batch {}: loss = {:.4}", num_batches, loss_value);
        }

        let avg_loss = epoch_loss / num_batches.max(1) as f64;
        let train_acc = correct as f64 / seen.max(1) as f64;
        train_losses.push(avg_loss);

        let inner = model.valid();
        let val_acc = if val_dataset.is_empty() {
            None
        } else {
            Some(evaluate(&inner, &val_dataset, &batcher, config.batch_size, device))
        };

        logger.end_epoch(avg_loss, train_acc, val_acc);

        // Without a validation split the latest epoch wins
        let improved = match (&best, val_acc) {
            (None, _) => true,
            (Some((_, Some(best_acc), _)), Some(acc)) => acc > *best_acc,
            (Some(_), None) => true,
            (Some((_, None, _)), Some(_)) => true,
        };
        if improved {
            best = Some((epoch, val_acc, inner));
        }
    }

    let (best_epoch, best_val_accuracy, best_model) = best
        .ok_or_else(|| GeoCropError::Training("no epoch completed".to_string()))?;

    logger.log_complete(best_val_accuracy);

    let checkpoint = Checkpoint::new(best_model, metadata)?;
    let checkpoint_dir = checkpoint.save(output_dir)?;

    info!(
        "Saved epoch {} to {:?}",
        best_epoch + 1,
        checkpoint_dir
    );

    Ok(TrainingReport {
        checkpoint_dir,
        crop_classes: classes,
        tab_columns: schema.columns().to_vec(),
        train_samples: train_dataset.len(),
        validation_samples: val_dataset.len(),
        best_epoch,
        best_val_accuracy,
        train_losses,
    })
}

/// Train with the column order, image preprocessing and network widths of an
/// existing checkpoint, such as one written by `geocrop init`
///
/// Classes still come from the manifest; the checkpoint's weights are not reused.
pub fn run_training_from<B: AutodiffBackend>(
    manifest_path: &Path,
    init_dir: &Path,
    output_dir: &Path,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainingReport> {
    let template = CheckpointMetadata::load(init_dir)?;
    info!(
        "Using settings from {:?}: columns {:?}",
        init_dir, template.tab_columns
    );

    run_training::<B>(
        manifest_path,
        output_dir,
        config,
        template.tab_columns,
        template.model,
        template.image,
        device,
    )
}

fn count_correct<B: Backend>(
    logits: burn::tensor::Tensor<B, 2>,
    targets: burn::tensor::Tensor<B, 1, burn::tensor::Int>,
    batch_size: usize,
) -> usize {
    let hits: i64 = logits
        .argmax(1)
        .reshape([batch_size])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    hits.max(0) as usize
}

/// Accuracy of a model on a dataset, in `[0, 1]`
fn evaluate<B: Backend>(
    model: &GeoNet<B>,
    dataset: &CropDataset,
    batcher: &CropBatcher,
    batch_size: usize,
    device: &B::Device,
) -> f64 {
    let mut correct = 0usize;
    let mut total = 0usize;

    let indices: Vec<usize> = (0..dataset.len()).collect();
    for chunk in indices.chunks(batch_size) {
        let items: Vec<_> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }

        let batch: CropBatch<B> = batcher.batch(items, device);
        let n = batch.targets.dims()[0];
        let output = model.forward(batch.images, batch.features);

        correct += count_correct(output.logits, batch.targets, n);
        total += n;
    }

    correct as f64 / total.max(1) as f64
}
