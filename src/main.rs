//! GeoCrop CLI
//!
//! Entry point for creating, training, inspecting and querying GeoCrop
//! checkpoints with the Burn framework.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use geocrop::backend::{backend_name, default_device, InferenceBackend, TrainingBackend};
use geocrop::inference::{recommendation, CropPredictor};
use geocrop::model::{Checkpoint, CheckpointMetadata, GeoNetConfig};
use geocrop::training::{run_training, run_training_from, TrainingConfig};
use geocrop::utils::logging::{init_logging, LogConfig};
use geocrop::utils::{format_duration, format_percent};
use geocrop::{FeatureVector, ImageSpec, DEFAULT_IMAGE_SIZE, DEFAULT_TOP_K};

/// Gated image + soil/weather crop prediction
///
/// Trains and runs a small Burn network that fuses a field image with
/// soil and weather measurements to predict the crop type.
#[derive(Parser, Debug)]
#[command(name = "geocrop")]
#[command(version)]
#[command(about = "Gated multimodal crop prediction with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a freshly initialized, valid checkpoint
    Init {
        /// Checkpoint directory to create
        #[arg(short, long)]
        output: PathBuf,

        /// Crop classes, in output order
        #[arg(long, value_delimiter = ',', default_value = "Wheat,Rice,Maize")]
        classes: Vec<String>,

        /// Tabular feature columns, in input order
        #[arg(long, value_delimiter = ',', default_value = "ph,N,P,K,rainfall,temp,lat,lon")]
        columns: Vec<String>,

        /// Square image size
        #[arg(long, default_value_t = DEFAULT_IMAGE_SIZE)]
        image_size: u32,

        /// Filters in the first backbone block
        #[arg(long, default_value = "32")]
        base_filters: usize,

        /// Random seed for weight initialization
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Train a model from a JSON manifest
    Train {
        /// Path to the manifest file
        #[arg(short, long)]
        manifest: PathBuf,

        /// Checkpoint directory to write
        #[arg(short, long, default_value = "output/model")]
        output: PathBuf,

        /// Take columns, image size and widths from this checkpoint
        #[arg(long, conflicts_with_all = ["columns", "image_size"])]
        init_from: Option<PathBuf>,

        /// Tabular feature columns, in input order
        #[arg(long, value_delimiter = ',', default_value = "ph,N,P,K,rainfall,temp,lat,lon")]
        columns: Vec<String>,

        /// Number of training epochs
        #[arg(short, long, default_value = "10")]
        epochs: usize,

        /// Batch size for training
        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        /// Learning rate
        #[arg(short, long, default_value = "0.001")]
        learning_rate: f64,

        /// Square image size
        #[arg(long, default_value_t = DEFAULT_IMAGE_SIZE)]
        image_size: u32,

        /// Fraction of samples held out for validation (0.0-1.0)
        #[arg(long, default_value = "0.2")]
        validation_fraction: f64,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Predict the crop for one image and feature vector
    Predict {
        /// Checkpoint directory
        #[arg(short, long)]
        checkpoint: PathBuf,

        /// Input image
        #[arg(short, long)]
        image: PathBuf,

        /// Comma-separated feature values, in the checkpoint's column order
        #[arg(short, long, value_delimiter = ',', allow_negative_numbers = true)]
        features: Vec<f32>,

        /// Number of ranked classes to show
        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        /// Print the prediction as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Validate a checkpoint and print its metadata
    Inspect {
        /// Checkpoint directory
        #[arg(short, long)]
        checkpoint: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Init {
            output,
            classes,
            columns,
            image_size,
            base_filters,
            seed,
        } => {
            print_banner();
            cmd_init(&output, classes, columns, image_size, base_filters, seed)?;
        }

        Commands::Train {
            manifest,
            output,
            init_from,
            columns,
            epochs,
            batch_size,
            learning_rate,
            image_size,
            validation_fraction,
            seed,
        } => {
            print_banner();
            let config = TrainingConfig {
                epochs,
                batch_size,
                learning_rate,
                validation_fraction,
                seed,
            };
            let settings = match init_from {
                Some(dir) => TrainSettings::From(dir),
                None => TrainSettings::Explicit { columns, image_size },
            };
            cmd_train(&manifest, &output, &config, settings)?;
        }

        Commands::Predict {
            checkpoint,
            image,
            features,
            top_k,
            json,
        } => {
            if !json {
                print_banner();
            }
            cmd_predict(&checkpoint, &image, features, top_k, json)?;
        }

        Commands::Inspect { checkpoint } => {
            print_banner();
            cmd_inspect(&checkpoint)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════╗
 ║   🌾 GeoCrop                                                  ║
 ║   Gated image + soil/weather crop prediction with Burn       ║
 ╚══════════════════════════════════════════════════════════════╝
 "#
        .green()
    );
}

fn cmd_init(
    output: &Path,
    classes: Vec<String>,
    columns: Vec<String>,
    image_size: u32,
    base_filters: usize,
    seed: u64,
) -> Result<()> {
    info!("Initializing checkpoint at {:?} (seed {})", output, seed);

    let metadata = CheckpointMetadata::new(
        classes,
        columns,
        ImageSpec::with_size(image_size),
        GeoNetConfig::new().with_base_filters(base_filters),
    );

    let device = default_device();
    InferenceBackend::seed(seed);
    let checkpoint = Checkpoint::<InferenceBackend>::init(metadata, &device)
        .context("invalid checkpoint settings")?;
    checkpoint.save(output)?;

    println!("{}", "Checkpoint created:".cyan().bold());
    print_metadata(&checkpoint.metadata);
    println!();
    println!(
        "{} weights are untrained; run `geocrop train` before relying on predictions",
        "Note:".yellow()
    );

    Ok(())
}

/// Where `train` takes its column order and preprocessing from
enum TrainSettings {
    Explicit { columns: Vec<String>, image_size: u32 },
    From(PathBuf),
}

fn cmd_train(manifest: &Path, output: &Path, config: &TrainingConfig, settings: TrainSettings) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  📄 Manifest:        {:?}", manifest);
    println!("  🔄 Epochs:          {}", config.epochs);
    println!("  📦 Batch size:      {}", config.batch_size);
    println!("  📈 Learning rate:   {}", config.learning_rate);
    match &settings {
        TrainSettings::Explicit { columns, image_size } => {
            println!("  🖼️  Image size:      {}x{}", image_size, image_size);
            println!("  📋 Columns:         {}", columns.join(","));
        }
        TrainSettings::From(dir) => println!("  📋 Settings from:   {:?}", dir),
    }
    println!("  🧠 Backend:         {}", backend_name());
    println!();

    let start = std::time::Instant::now();
    let device = default_device();
    let report = match settings {
        TrainSettings::Explicit { columns, image_size } => run_training::<TrainingBackend>(
            manifest,
            output,
            config,
            columns,
            GeoNetConfig::new(),
            ImageSpec::with_size(image_size),
            &device,
        )?,
        TrainSettings::From(dir) => {
            run_training_from::<TrainingBackend>(manifest, &dir, output, config, &device)
                .with_context(|| format!("failed to train from settings in {:?}", dir))?
        }
    };

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  ⏱️  Duration:        {}", format_duration(start.elapsed().as_secs_f64()));
    println!("  🏷️  Classes:         {}", report.crop_classes.join(", "));
    println!(
        "  📊 Samples:         {} train / {} validation",
        report.train_samples, report.validation_samples
    );
    if let Some(acc) = report.best_val_accuracy {
        println!(
            "  🎉 Best val acc:    {:.2}% (epoch {})",
            acc * 100.0,
            report.best_epoch + 1
        );
    }
    println!("  💾 Saved to:        {:?}", report.checkpoint_dir);
    println!();
    println!("{}", "Next steps:".cyan().bold());
    println!(
        "  • Predict: geocrop predict --checkpoint {:?} --image <file> --features {}",
        report.checkpoint_dir,
        report.tab_columns.join(",")
    );

    Ok(())
}

fn cmd_predict(
    checkpoint: &Path,
    image: &Path,
    features: Vec<f32>,
    top_k: usize,
    json: bool,
) -> Result<()> {
    let predictor = CropPredictor::<InferenceBackend>::load(checkpoint, default_device())
        .with_context(|| format!("failed to load checkpoint {:?}", checkpoint))?;

    let features = FeatureVector::new(features);
    let prediction = predictor.predict_path(image, &features)?;
    let advice = recommendation(&prediction.predicted_label, &features, predictor.schema());

    if json {
        let output = serde_json::json!({
            "crop": prediction.predicted_label,
            "confidence": prediction.confidence,
            "gate_weights": prediction.gate_weights,
            "top_predictions": prediction.top_k(top_k),
            "recommendation": advice,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", "Inference:".cyan().bold());
    println!("  📷 Image:    {:?}", image);
    println!("  🧠 Model:    {:?}", checkpoint);
    println!("  🖥️  Backend:  {}", backend_name());
    println!();
    print!("{}", prediction.display(top_k));
    println!();
    println!("{} {}", "Recommendation:".green().bold(), advice);
    println!(
        "  (confidence {})",
        format_percent(prediction.confidence)
    );

    Ok(())
}

fn cmd_inspect(checkpoint: &Path) -> Result<()> {
    let device = default_device();
    let loaded = Checkpoint::<InferenceBackend>::load(checkpoint, &device)
        .with_context(|| format!("checkpoint {:?} is not valid", checkpoint))?;

    println!("{} {:?}", "Checkpoint OK:".green().bold(), checkpoint);
    print_metadata(&loaded.metadata);

    Ok(())
}

fn print_metadata(metadata: &CheckpointMetadata) {
    println!("  🏷️  Classes:   {}", metadata.crop_classes.join(", "));
    println!("  📊 Columns:   {}", metadata.tab_columns.join(", "));
    println!(
        "  🖼️  Image:     {}x{} (mean {:?}, std {:?})",
        metadata.image.size, metadata.image.size, metadata.image.mean, metadata.image.std
    );
    println!("  🧠 Network:   {}", metadata.model.describe());
    if let Some(created) = &metadata.created_at {
        println!("  🕒 Created:   {}", created);
    }
}
