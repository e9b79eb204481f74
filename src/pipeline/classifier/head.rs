//! Linear classification head and its on-disk checkpoint.
//!
//! The checkpoint is plain JSON so the service can load it without any
//! tensor runtime:
//!
//! ```json
//! { "format": "retinet-head/1", "backbone": "patch-stats-8x8",
//!   "feature_dim": 384, "num_classes": 5,
//!   "weights": [...], "bias": [...], "epoch": 7, "val_accuracy": 0.81 }
//! ```
//!
//! `weights` is row-major `[num_classes, feature_dim]`.

use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::ClassifierError;

/// Format tag written into every checkpoint.
pub const CHECKPOINT_FORMAT: &str = "retinet-head/1";

/// Seed for the unspecialized head so un-fine-tuned predictions are stable.
pub const HEAD_INIT_SEED: u64 = 0x5EED_0001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadCheckpoint {
    pub format: String,
    pub backbone: String,
    pub feature_dim: usize,
    pub num_classes: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub epoch: Option<usize>,
    #[serde(default)]
    pub val_accuracy: Option<f64>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl HeadCheckpoint {
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let raw = std::fs::read(path).map_err(|e| ClassifierError::Weights {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&raw).map_err(|e| ClassifierError::Weights {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write to `path` through a sibling temp file and rename, so a reader
    /// never observes a half-written checkpoint.
    pub fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        let weights_err = |reason: String| ClassifierError::Weights {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| weights_err(e.to_string()))?;
        }
        let json = serde_json::to_vec(self).map_err(|e| weights_err(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| weights_err(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| weights_err(e.to_string()))?;
        Ok(())
    }
}

/// `logits = W · features + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearHead {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl LinearHead {
    pub fn new(weights: Array2<f32>, bias: Array1<f32>) -> Result<Self, ClassifierError> {
        if weights.nrows() != bias.len() {
            return Err(ClassifierError::ShapeMismatch(format!(
                "{} weight rows but {} bias terms",
                weights.nrows(),
                bias.len()
            )));
        }
        Ok(Self { weights, bias })
    }

    /// Seeded uniform init in ±1/√d, the usual default for a fresh linear layer.
    pub fn unspecialized(feature_dim: usize, num_classes: usize) -> Self {
        let bound = 1.0 / (feature_dim.max(1) as f32).sqrt();
        let mut rng = StdRng::seed_from_u64(HEAD_INIT_SEED);
        let weights = Array2::from_shape_simple_fn((num_classes, feature_dim), || {
            rng.gen_range(-bound..=bound)
        });
        let bias = Array1::from_shape_simple_fn(num_classes, || rng.gen_range(-bound..=bound));
        Self { weights, bias }
    }

    pub fn feature_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn num_classes(&self) -> usize {
        self.weights.nrows()
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    pub(crate) fn weights_mut(&mut self) -> &mut Array2<f32> {
        &mut self.weights
    }

    pub(crate) fn bias_mut(&mut self) -> &mut Array1<f32> {
        &mut self.bias
    }

    pub fn logits(&self, features: &Array1<f32>) -> Result<Array1<f32>, ClassifierError> {
        if features.len() != self.feature_dim() {
            return Err(ClassifierError::ShapeMismatch(format!(
                "head expects {} features, backbone produced {}",
                self.feature_dim(),
                features.len()
            )));
        }
        Ok(self.weights.dot(features) + &self.bias)
    }

    /// Rebuild a head from a checkpoint, refusing one trained on a different backbone.
    pub fn from_checkpoint(
        checkpoint: &HeadCheckpoint,
        backbone: &str,
        feature_dim: usize,
        num_classes: usize,
    ) -> Result<Self, ClassifierError> {
        if checkpoint.format != CHECKPOINT_FORMAT {
            return Err(ClassifierError::ShapeMismatch(format!(
                "unknown checkpoint format '{}'",
                checkpoint.format
            )));
        }
        if checkpoint.backbone != backbone {
            return Err(ClassifierError::BackboneMismatch {
                expected: backbone.to_string(),
                found: checkpoint.backbone.clone(),
            });
        }
        if checkpoint.feature_dim != feature_dim || checkpoint.num_classes != num_classes {
            return Err(ClassifierError::ShapeMismatch(format!(
                "checkpoint is {}x{}, model needs {}x{}",
                checkpoint.num_classes, checkpoint.feature_dim, num_classes, feature_dim
            )));
        }
        let weights = Array2::from_shape_vec((num_classes, feature_dim), checkpoint.weights.clone())
            .map_err(|e| ClassifierError::ShapeMismatch(e.to_string()))?;
        Self::new(weights, Array1::from(checkpoint.bias.clone()))
    }

    pub fn to_checkpoint(
        &self,
        backbone: &str,
        epoch: Option<usize>,
        val_accuracy: Option<f64>,
    ) -> HeadCheckpoint {
        HeadCheckpoint {
            format: CHECKPOINT_FORMAT.to_string(),
            backbone: backbone.to_string(),
            feature_dim: self.feature_dim(),
            num_classes: self.num_classes(),
            weights: self.weights.iter().copied().collect(),
            bias: self.bias.to_vec(),
            epoch,
            val_accuracy,
            saved_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn unspecialized_init_is_seeded_and_bounded() {
        let a = LinearHead::unspecialized(384, 5);
        let b = LinearHead::unspecialized(384, 5);
        assert_eq!(a, b);
        let bound = 1.0 / (384f32).sqrt();
        assert!(a.weights().iter().all(|w| w.abs() <= bound));
        assert_eq!(a.weights().dim(), (5, 384));
    }

    #[test]
    fn logits_are_affine() {
        let head = LinearHead::new(array![[1.0, 0.0], [0.0, 2.0]], array![0.5, -1.0]).unwrap();
        let logits = head.logits(&array![3.0, 4.0]).unwrap();
        assert_eq!(logits, array![3.5, 7.0]);
    }

    #[test]
    fn logits_reject_wrong_width() {
        let head = LinearHead::unspecialized(4, 5);
        assert!(matches!(
            head.logits(&array![1.0, 2.0]),
            Err(ClassifierError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn checkpoint_file_restores_same_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("head.json");
        let head = LinearHead::unspecialized(6, 5);
        head.to_checkpoint("patch-stats-1x1", Some(3), Some(0.5))
            .save(&path)
            .unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = HeadCheckpoint::load(&path).unwrap();
        assert_eq!(loaded.epoch, Some(3));
        let restored = LinearHead::from_checkpoint(&loaded, "patch-stats-1x1", 6, 5).unwrap();
        assert_eq!(restored, head);
    }

    #[test]
    fn checkpoint_for_other_backbone_is_refused() {
        let ckpt = LinearHead::unspecialized(6, 5).to_checkpoint("onnx-resnet50", None, None);
        let err = LinearHead::from_checkpoint(&ckpt, "patch-stats-1x1", 6, 5).unwrap_err();
        assert!(matches!(err, ClassifierError::BackboneMismatch { .. }));
    }

    #[test]
    fn checkpoint_with_wrong_dims_is_refused() {
        let ckpt = LinearHead::unspecialized(6, 5).to_checkpoint("b", None, None);
        let err = LinearHead::from_checkpoint(&ckpt, "b", 8, 5).unwrap_err();
        assert!(matches!(err, ClassifierError::ShapeMismatch(_)));
    }

    #[test]
    fn corrupt_checkpoint_is_weights_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            HeadCheckpoint::load(&path),
            Err(ClassifierError::Weights { .. })
        ));
    }
}
