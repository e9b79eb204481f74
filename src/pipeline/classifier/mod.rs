//! Five-grade diabetic retinopathy classifier.
//!
//! A frozen [`Backbone`] turns the preprocessed image into a feature vector,
//! a [`LinearHead`] maps it to five logits, softmax picks the grade.

pub mod backbone;
pub mod head;
pub mod service;

use std::path::{Path, PathBuf};

use ndarray::Array1;
use thiserror::Error;

use crate::models::enums::{DrGrade, WeightsBasis};
use crate::pipeline::preprocess::InputTensor;

pub use backbone::{Backbone, PatchStatsBackbone, DEFAULT_PATCH_GRID};
#[cfg(feature = "onnx")]
pub use backbone::OnnxBackbone;
pub use head::{HeadCheckpoint, LinearHead, CHECKPOINT_FORMAT};
pub use service::ClassifierService;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Model initialization failed: {0}")]
    ModelInit(String),

    #[error("Cannot load weights from {path}: {reason}")]
    Weights { path: PathBuf, reason: String },

    #[error("Weights were trained on backbone '{found}', model uses '{expected}'")]
    BackboneMismatch { expected: String, found: String },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid input tensor: {0}")]
    InvalidInput(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Classifier task failed: {0}")]
    Task(String),
}

/// Which feature extractor to put in front of the head.
#[derive(Debug, Clone, PartialEq)]
pub enum BackboneKind {
    PatchStats,
    #[cfg(feature = "onnx")]
    Onnx(PathBuf),
}

impl BackboneKind {
    /// ONNX when a model path is configured and the feature is compiled in.
    pub fn from_config(onnx_path: Option<&Path>) -> Self {
        match onnx_path {
            #[cfg(feature = "onnx")]
            Some(path) => Self::Onnx(path.to_path_buf()),
            #[cfg(not(feature = "onnx"))]
            Some(path) => {
                tracing::warn!(
                    path = %path.display(),
                    "Backbone path set but built without the `onnx` feature; using patch statistics"
                );
                Self::PatchStats
            }
            None => Self::PatchStats,
        }
    }

    pub fn build(&self) -> Result<Box<dyn Backbone>, ClassifierError> {
        match self {
            Self::PatchStats => Ok(Box::new(PatchStatsBackbone::default())),
            #[cfg(feature = "onnx")]
            Self::Onnx(path) => Ok(Box::new(OnnxBackbone::load(path)?)),
        }
    }
}

/// Everything needed to (re)build the classifier.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub backbone: BackboneKind,
    /// Fine-tuned head checkpoint. Absent file ⇒ unspecialized head.
    pub weights_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub grade: DrGrade,
    /// Probability of `grade`, in [0, 1].
    pub confidence: f32,
    pub probabilities: Vec<f32>,
}

pub struct RetinaClassifier {
    backbone: Box<dyn Backbone>,
    head: LinearHead,
    basis: WeightsBasis,
}

impl RetinaClassifier {
    pub fn new(
        backbone: Box<dyn Backbone>,
        head: LinearHead,
        basis: WeightsBasis,
    ) -> Result<Self, ClassifierError> {
        if head.feature_dim() != backbone.feature_dim() || head.num_classes() != DrGrade::COUNT {
            return Err(ClassifierError::ShapeMismatch(format!(
                "head is {}x{}, backbone '{}' gives {} features for {} grades",
                head.num_classes(),
                head.feature_dim(),
                backbone.name(),
                backbone.feature_dim(),
                DrGrade::COUNT
            )));
        }
        Ok(Self {
            backbone,
            head,
            basis,
        })
    }

    /// Build the backbone, then overlay fine-tuned head weights when present.
    pub fn load(spec: &ModelSpec) -> Result<Self, ClassifierError> {
        let backbone = spec.backbone.build()?;
        let dim = backbone.feature_dim();

        if spec.weights_path.exists() {
            let checkpoint = HeadCheckpoint::load(&spec.weights_path)?;
            let head =
                LinearHead::from_checkpoint(&checkpoint, backbone.name(), dim, DrGrade::COUNT)?;
            tracing::info!(
                path = %spec.weights_path.display(),
                backbone = backbone.name(),
                epoch = ?checkpoint.epoch,
                val_accuracy = ?checkpoint.val_accuracy,
                "Loaded fine-tuned classification head"
            );
            Self::new(backbone, head, WeightsBasis::FineTuned)
        } else {
            tracing::warn!(
                path = %spec.weights_path.display(),
                backbone = backbone.name(),
                "Fine-tuned weights not found; grades come from an unspecialized head and carry no clinical meaning"
            );
            let head = LinearHead::unspecialized(dim, DrGrade::COUNT);
            Self::new(backbone, head, WeightsBasis::Unspecialized)
        }
    }

    pub fn basis(&self) -> WeightsBasis {
        self.basis
    }

    pub fn backbone_name(&self) -> &str {
        self.backbone.name()
    }

    pub fn predict(&self, input: &InputTensor) -> Result<Prediction, ClassifierError> {
        let features = self.backbone.features(input)?;
        let logits = self.head.logits(&features)?;
        let probabilities = softmax(&logits);
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(ClassifierError::Inference(
                "non-finite class probabilities".to_string(),
            ));
        }

        let (index, confidence) = argmax(&probabilities);
        let grade = DrGrade::from_index(index)
            .ok_or_else(|| {
                ClassifierError::Inference(format!("class index {index} out of range"))
            })?;

        Ok(Prediction {
            grade,
            confidence,
            probabilities: probabilities.to_vec(),
        })
    }
}

/// Numerically stable softmax (max subtracted before `exp`).
pub fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// First index of the maximum value.
fn argmax(values: &Array1<f32>) -> (usize, f32) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
}


#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn softmax_sums_to_one_and_survives_large_logits() {
        let probs = softmax(&array![1000.0, 1001.0, 999.0, 0.0, -5.0]);
        assert!((probs.sum() - 1.0).abs() < 1e-6);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert_eq!(argmax(&probs).0, 1);
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&array![0.25, 0.25, 0.5, 0.5]).0, 2);
    }

    #[test]
    fn missing_weights_fall_back_to_unspecialized() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ModelSpec {
            backbone: BackboneKind::PatchStats,
            weights_path: dir.path().join("absent.json"),
        };
        let model = RetinaClassifier::load(&spec).unwrap();
        assert_eq!(model.basis(), WeightsBasis::Unspecialized);

        let prediction = model.predict(&InputTensor::zeros((1, 3, 224, 224))).unwrap();
        assert_eq!(prediction.probabilities.len(), 5);
        assert!(prediction.confidence >= 0.2 && prediction.confidence <= 1.0);
    }

    #[test]
    fn fine_tuned_weights_drive_the_grade() {
        let dir = tempfile::tempdir().unwrap();
        let weights_path = dir.path().join("retinet_v1.json");
        test_support::write_biased_head(&weights_path, DrGrade::Severe);

        let spec = ModelSpec {
            backbone: BackboneKind::PatchStats,
            weights_path,
        };
        let model = RetinaClassifier::load(&spec).unwrap();
        assert_eq!(model.basis(), WeightsBasis::FineTuned);

        let prediction = model.predict(&InputTensor::zeros((1, 3, 224, 224))).unwrap();
        assert_eq!(prediction.grade, DrGrade::Severe);
        // e^4 / (e^4 + 4)
        assert!((prediction.confidence - 0.93174).abs() < 1e-4);
    }

    #[test]
    fn mismatched_checkpoint_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let weights_path = dir.path().join("retinet_v1.json");
        LinearHead::unspecialized(10, 5)
            .to_checkpoint("patch-stats-8x8", None, None)
            .save(&weights_path)
            .unwrap();
        let spec = ModelSpec {
            backbone: BackboneKind::PatchStats,
            weights_path,
        };
        assert!(matches!(
            RetinaClassifier::load(&spec),
            Err(ClassifierError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn backbone_kind_defaults_to_patch_stats() {
        assert_eq!(BackboneKind::from_config(None), BackboneKind::PatchStats);
    }
}
