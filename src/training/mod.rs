//! Offline fine-tuning of the classification head.
//!
//! `prepare` turns a labelled raw dump into the `{train,val}/{grade}/` layout,
//! `trainer` fits the head over that layout and writes the checkpoint the
//! service loads at startup.

pub mod dataset;
pub mod prepare;
pub mod trainer;

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::classifier::ClassifierError;

pub use dataset::ImageFolder;
pub use prepare::{prepare_dataset, PrepareConfig, PrepareSummary};
pub use trainer::{train, EpochReport, Phase, PhaseStats, TrainConfig, TrainingSummary};

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Dataset directory not found: {0}")]
    DatasetMissing(PathBuf),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Labels file error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}
