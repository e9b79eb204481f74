//! Fine-tunes the linear head over a frozen backbone.
//!
//! Each epoch runs a training phase (augmented inputs, Adam updates on
//! softmax cross-entropy) and then a validation phase (inference transform,
//! no updates). The head is checkpointed whenever validation accuracy
//! strictly improves on the best seen so far.

use std::path::PathBuf;

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::dataset::ImageFolder;
use super::TrainingError;
use crate::models::enums::DrGrade;
use crate::pipeline::classifier::{softmax, Backbone, BackboneKind, LinearHead};
use crate::pipeline::preprocess::{eval_transform, train_transform};

pub const DEFAULT_EPOCHS: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_LEARNING_RATE: f32 = 0.001;

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-8;
/// Floor on the target probability inside `ln` so the loss stays finite.
const MIN_PROB: f32 = 1e-12;

#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Directory holding `train/` and `val/` image folders.
    pub data_dir: PathBuf,
    /// Where the best head checkpoint is written.
    pub output: PathBuf,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub seed: u64,
    pub backbone: BackboneKind,
}

impl TrainConfig {
    pub fn new(data_dir: PathBuf, output: PathBuf) -> Self {
        Self {
            data_dir,
            output,
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            seed: 0,
            backbone: BackboneKind::PatchStats,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Val,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Val => "val",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseStats {
    pub phase: Phase,
    /// Mean cross-entropy per sample.
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: usize,
    pub train: PhaseStats,
    pub val: PhaseStats,
    pub checkpoint_saved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub epochs: Vec<EpochReport>,
    pub best_val_accuracy: f64,
    /// `None` when validation accuracy never rose above zero.
    pub best_epoch: Option<usize>,
}

/// Loss and logit gradient for one sample.
fn softmax_cross_entropy(logits: &Array1<f32>, target: usize) -> (f32, Array1<f32>) {
    let mut grad = softmax(logits);
    let loss = -grad[target].max(MIN_PROB).ln();
    grad[target] -= 1.0;
    (loss, grad)
}

fn argmax(values: &Array1<f32>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Adam state for the head parameters.
struct Adam {
    lr: f32,
    step: i32,
    m_w: Array2<f32>,
    v_w: Array2<f32>,
    m_b: Array1<f32>,
    v_b: Array1<f32>,
}

impl Adam {
    fn new(head: &LinearHead, lr: f32) -> Self {
        let w_dim = head.weights().raw_dim();
        let b_dim = head.bias().raw_dim();
        Self {
            lr,
            step: 0,
            m_w: Array2::zeros(w_dim),
            v_w: Array2::zeros(w_dim),
            m_b: Array1::zeros(b_dim),
            v_b: Array1::zeros(b_dim),
        }
    }

    fn update(&mut self, head: &mut LinearHead, grad_w: &Array2<f32>, grad_b: &Array1<f32>) {
        self.step += 1;
        let bias1 = 1.0 - ADAM_BETA1.powi(self.step);
        let bias2 = 1.0 - ADAM_BETA2.powi(self.step);
        let lr = self.lr;

        let step_fn = |param: &mut f32, m: &mut f32, v: &mut f32, g: f32| {
            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
            *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *param -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
        };

        ndarray::Zip::from(head.weights_mut())
            .and(&mut self.m_w)
            .and(&mut self.v_w)
            .and(grad_w)
            .for_each(|p, m, v, &g| step_fn(p, m, v, g));
        ndarray::Zip::from(head.bias_mut())
            .and(&mut self.m_b)
            .and(&mut self.v_b)
            .and(grad_b)
            .for_each(|p, m, v, &g| step_fn(p, m, v, g));
    }
}

struct Trainer<'a> {
    backbone: &'a dyn Backbone,
    head: LinearHead,
    optimizer: Adam,
    rng: StdRng,
    batch_size: usize,
}

impl Trainer<'_> {
    fn run_phase(&mut self, phase: Phase, data: &ImageFolder) -> Result<PhaseStats, TrainingError> {
        let mut running_loss = 0.0f64;
        let mut corrects = 0usize;

        let shuffle = phase == Phase::Train;
        for batch in data.batches(self.batch_size, shuffle, &mut self.rng) {
            let mut grad_w = Array2::<f32>::zeros(self.head.weights().raw_dim());
            let mut grad_b = Array1::<f32>::zeros(self.head.bias().raw_dim());

            for &index in &batch {
                let (img, label) = data.load(index)?;
                let input = match phase {
                    Phase::Train => train_transform(&img, &mut self.rng),
                    Phase::Val => eval_transform(&img),
                };
                let features = self.backbone.features(&input)?;
                let logits = self.head.logits(&features)?;
                if argmax(&logits) == label {
                    corrects += 1;
                }
                let (loss, grad_logits) = softmax_cross_entropy(&logits, label);
                running_loss += f64::from(loss);

                if phase == Phase::Train {
                    let outer = grad_logits
                        .view()
                        .insert_axis(Axis(1))
                        .dot(&features.view().insert_axis(Axis(0)));
                    grad_w += &outer;
                    grad_b += &grad_logits;
                }
            }

            if phase == Phase::Train && !batch.is_empty() {
                let scale = 1.0 / batch.len() as f32;
                grad_w.mapv_inplace(|g| g * scale);
                grad_b.mapv_inplace(|g| g * scale);
                self.optimizer.update(&mut self.head, &grad_w, &grad_b);
            }
        }

        let samples = data.len();
        Ok(PhaseStats {
            phase,
            loss: running_loss / samples.max(1) as f64,
            accuracy: corrects as f64 / samples.max(1) as f64,
            samples,
        })
    }
}

fn open_split(config: &TrainConfig, split: &str) -> Result<ImageFolder, TrainingError> {
    let folder = ImageFolder::open(&config.data_dir.join(split))?;
    if folder.classes().len() != DrGrade::COUNT {
        return Err(TrainingError::InvalidDataset(format!(
            "{} has {} class directories, expected {}",
            folder.root().display(),
            folder.classes().len(),
            DrGrade::COUNT
        )));
    }
    if folder.is_empty() {
        return Err(TrainingError::InvalidDataset(format!(
            "{} contains no images",
            folder.root().display()
        )));
    }
    tracing::info!(
        split,
        path = %folder.root().display(),
        images = folder.len(),
        "Dataset split opened"
    );
    Ok(folder)
}

pub fn train(config: &TrainConfig) -> Result<TrainingSummary, TrainingError> {
    if config.epochs == 0 || config.batch_size == 0 {
        return Err(TrainingError::InvalidConfig(
            "epochs and batch size must be positive".to_string(),
        ));
    }
    if config.learning_rate.is_nan() || config.learning_rate <= 0.0 {
        return Err(TrainingError::InvalidConfig(format!(
            "learning rate must be positive, got {}",
            config.learning_rate
        )));
    }
    if !config.data_dir.is_dir() {
        return Err(TrainingError::DatasetMissing(config.data_dir.clone()));
    }

    let train_set = open_split(config, "train")?;
    let val_set = open_split(config, "val")?;

    let backbone = config.backbone.build()?;
    let head = LinearHead::unspecialized(backbone.feature_dim(), DrGrade::COUNT);
    tracing::info!(
        backbone = backbone.name(),
        train = train_set.len(),
        val = val_set.len(),
        epochs = config.epochs,
        batch_size = config.batch_size,
        lr = config.learning_rate,
        "Training started"
    );

    let mut trainer = Trainer {
        backbone: backbone.as_ref(),
        optimizer: Adam::new(&head, config.learning_rate),
        head,
        rng: StdRng::seed_from_u64(config.seed),
        batch_size: config.batch_size,
    };

    let mut best_val_accuracy = 0.0f64;
    let mut best_epoch = None;
    let mut epochs = Vec::with_capacity(config.epochs);

    for epoch in 1..=config.epochs {
        let train_stats = trainer.run_phase(Phase::Train, &train_set)?;
        let val_stats = trainer.run_phase(Phase::Val, &val_set)?;
        for stats in [&train_stats, &val_stats] {
            tracing::info!(
                epoch,
                phase = stats.phase.as_str(),
                loss = stats.loss,
                accuracy = stats.accuracy,
                "Epoch phase complete"
            );
        }

        let checkpoint_saved = val_stats.accuracy > best_val_accuracy;
        if checkpoint_saved {
            best_val_accuracy = val_stats.accuracy;
            best_epoch = Some(epoch);
            trainer
                .head
                .to_checkpoint(backbone.name(), Some(epoch), Some(val_stats.accuracy))
                .save(&config.output)?;
            tracing::info!(
                epoch,
                val_accuracy = val_stats.accuracy,
                path = %config.output.display(),
                "Checkpoint saved"
            );
        }

        epochs.push(EpochReport {
            epoch,
            train: train_stats,
            val: val_stats,
            checkpoint_saved,
        });
    }

    tracing::info!(best_val_accuracy, best_epoch = ?best_epoch, "Training complete");
    Ok(TrainingSummary {
        epochs,
        best_val_accuracy,
        best_epoch,
    })
}
