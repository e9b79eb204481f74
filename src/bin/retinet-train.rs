//! Offline dataset preparation and head fine-tuning.
//!
//! Usage examples:
//!   retinet-train prepare --raw raw/train_images --labels raw/train.csv --out dataset
//!   retinet-train train --data dataset --epochs 10 --batch-size 32

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use retinet_lib::config::{self, FINE_TUNED_WEIGHTS_FILE};
use retinet_lib::pipeline::classifier::BackboneKind;
use retinet_lib::training::{self, PrepareConfig, TrainConfig};

#[derive(Parser)]
#[command(
    name = "retinet-train",
    version,
    about = "Prepare fundus datasets and fine-tune the RetiNet classifier"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split a labelled image dump into train/val grade folders.
    Prepare {
        /// Directory holding `<id_code>.<ext>` source images.
        #[arg(long)]
        raw: PathBuf,

        /// CSV with `id_code` and `diagnosis` columns.
        #[arg(long)]
        labels: PathBuf,

        /// Output root (gets `train/` and `val/`).
        #[arg(long)]
        out: PathBuf,

        /// Fraction of each grade held out for validation.
        #[arg(long, default_value_t = training::prepare::DEFAULT_VAL_FRACTION)]
        val_fraction: f64,

        #[arg(long, default_value_t = training::prepare::DEFAULT_SPLIT_SEED)]
        seed: u64,
    },

    /// Fine-tune the classification head on a prepared dataset.
    Train {
        /// Prepared dataset root with `train/` and `val/`.
        #[arg(long)]
        data: PathBuf,

        /// Checkpoint path. Defaults to the file the service loads.
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long, default_value_t = training::trainer::DEFAULT_EPOCHS)]
        epochs: usize,

        #[arg(long, default_value_t = training::trainer::DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        #[arg(long, default_value_t = training::trainer::DEFAULT_LEARNING_RATE)]
        lr: f32,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// ONNX feature extractor (needs the `onnx` feature).
        #[arg(long)]
        backbone: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    retinet_lib::init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Prepare {
            raw,
            labels,
            out,
            val_fraction,
            seed,
        } => {
            let mut cfg = PrepareConfig::new(raw, labels, out);
            cfg.val_fraction = val_fraction;
            cfg.seed = seed;
            training::prepare_dataset(&cfg).map(|summary| {
                println!(
                    "prepared: {} train, {} val, {} already present",
                    summary.train_written, summary.val_written, summary.skipped_existing
                );
                println!(
                    "skipped: {} unknown grade, {} missing image, {} invalid id",
                    summary.unknown_grade, summary.missing_image, summary.invalid_id
                );
            })
        }
        Command::Train {
            data,
            out,
            epochs,
            batch_size,
            lr,
            seed,
            backbone,
        } => {
            let output = out.unwrap_or_else(|| config::models_dir().join(FINE_TUNED_WEIGHTS_FILE));
            let mut cfg = TrainConfig::new(data, output.clone());
            cfg.epochs = epochs;
            cfg.batch_size = batch_size;
            cfg.learning_rate = lr;
            cfg.seed = seed;
            cfg.backbone = BackboneKind::from_config(backbone.as_deref());
            training::train(&cfg).map(|summary| {
                for report in &summary.epochs {
                    println!(
                        "epoch {:>3}  train loss {:.4} acc {:.4}  val loss {:.4} acc {:.4}{}",
                        report.epoch,
                        report.train.loss,
                        report.train.accuracy,
                        report.val.loss,
                        report.val.accuracy,
                        if report.checkpoint_saved { "  *" } else { "" }
                    );
                }
                match summary.best_epoch {
                    Some(epoch) => println!(
                        "best val acc {:.4} at epoch {epoch}, saved to {}",
                        summary.best_val_accuracy,
                        output.display()
                    ),
                    None => println!("no checkpoint saved: validation accuracy never improved"),
                }
            })
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
