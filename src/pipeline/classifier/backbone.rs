use ndarray::{s, Array1};

use super::ClassifierError;
use crate::pipeline::preprocess::InputTensor;

/// Frozen feature extractor in front of the trainable head.
pub trait Backbone: Send + Sync {
    /// Stable identifier recorded in head checkpoints.
    fn name(&self) -> &str;
    fn feature_dim(&self) -> usize;
    /// Map one normalized NCHW image (batch of 1) to a feature vector.
    fn features(&self, input: &InputTensor) -> Result<Array1<f32>, ClassifierError>;
}

fn check_input(input: &InputTensor, min_edge: usize) -> Result<(usize, usize), ClassifierError> {
    let shape = input.shape();
    if shape[0] != 1 || shape[1] != 3 || shape[2] < min_edge || shape[3] < min_edge {
        return Err(ClassifierError::InvalidInput(format!(
            "expected [1, 3, H>={min_edge}, W>={min_edge}], got {shape:?}"
        )));
    }
    Ok((shape[2], shape[3]))
}

// ═══════════════════════════════════════════════════════════
// Patch statistics backbone (always available)
// ═══════════════════════════════════════════════════════════

/// Grid edge used by the default backbone (8×8 patches of 28 px at 224).
pub const DEFAULT_PATCH_GRID: usize = 8;

/// Per-channel mean and standard deviation over a square patch grid.
///
/// Captures regional brightness and texture (haemorrhages, exudates,
/// vessel density) without any learned weights, so it needs no model file.
pub struct PatchStatsBackbone {
    grid: usize,
    name: String,
}

impl PatchStatsBackbone {
    pub fn new(grid: usize) -> Self {
        let grid = grid.max(1);
        Self {
            grid,
            name: format!("patch-stats-{grid}x{grid}"),
        }
    }
}

impl Default for PatchStatsBackbone {
    fn default() -> Self {
        Self::new(DEFAULT_PATCH_GRID)
    }
}

impl Backbone for PatchStatsBackbone {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_dim(&self) -> usize {
        3 * self.grid * self.grid * 2
    }

    fn features(&self, input: &InputTensor) -> Result<Array1<f32>, ClassifierError> {
        let (h, w) = check_input(input, self.grid)?;
        let (patch_h, patch_w) = (h / self.grid, w / self.grid);

        let mut out = Vec::with_capacity(self.feature_dim());
        for c in 0..3 {
            for gy in 0..self.grid {
                for gx in 0..self.grid {
                    let (y0, x0) = (gy * patch_h, gx * patch_w);
                    let patch = input.slice(s![0, c, y0..y0 + patch_h, x0..x0 + patch_w]);
                    out.push(patch.mean().unwrap_or(0.0));
                    out.push(patch.std(0.0));
                }
            }
        }
        Ok(Array1::from(out))
    }
}

// ═══════════════════════════════════════════════════════════
// ONNX backbone, behind the `onnx` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx")]
mod onnx {
    use super::{check_input, Backbone, ClassifierError};
    use crate::pipeline::preprocess::InputTensor;
    use ndarray::Array1;
    use ort::session::Session;
    use std::path::Path;
    use std::sync::Mutex;

    /// Pretrained CNN exported to ONNX with its classifier removed, so the
    /// single output is the pooled feature vector (`[1, D]` or `[1, D, 1, 1]`).
    ///
    /// Uses interior mutability (Mutex) because ort::Session::run requires `&mut self`
    /// but the Backbone trait exposes `&self` for shared usage across requests.
    pub struct OnnxBackbone {
        session: Mutex<Session>,
        name: String,
        feature_dim: usize,
    }

    impl OnnxBackbone {
        /// Load the model and measure its output width with a zero image.
        pub fn load(model_path: &Path) -> Result<Self, ClassifierError> {
            if !model_path.exists() {
                return Err(ClassifierError::ModelNotFound(model_path.to_path_buf()));
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| ClassifierError::ModelInit(e.to_string()))?
                .with_intra_threads(2)
                .map_err(|e: ort::Error| ClassifierError::ModelInit(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e: ort::Error| {
                    ClassifierError::ModelInit(format!("ONNX load failed: {e}"))
                })?;

            let stem = model_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("backbone");

            let mut backbone = Self {
                session: Mutex::new(session),
                name: format!("onnx-{stem}"),
                feature_dim: 0,
            };
            let blank = InputTensor::zeros((1, 3, 224, 224));
            backbone.feature_dim = backbone.run(&blank)?.len();

            tracing::info!(
                path = %model_path.display(),
                feature_dim = backbone.feature_dim,
                "ONNX backbone loaded"
            );
            Ok(backbone)
        }

        fn run(&self, input: &InputTensor) -> Result<Array1<f32>, ClassifierError> {
            use ort::value::TensorRef;

            check_input(input, 1)?;
            let tensor = TensorRef::from_array_view(input)
                .map_err(|e| ClassifierError::Inference(e.to_string()))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| ClassifierError::Inference("Session lock poisoned".to_string()))?;

            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| ClassifierError::Inference(format!("ONNX inference failed: {e}")))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| ClassifierError::Inference(format!("Output extraction: {e}")))?;

            // Everything after the batch axis is the feature vector.
            if shape.is_empty() || shape[0] != 1 {
                return Err(ClassifierError::Inference(format!(
                    "Unexpected output shape: {shape:?}, expected [1, D, ..]"
                )));
            }
            Ok(Array1::from(data.to_vec()))
        }
    }

    impl Backbone for OnnxBackbone {
        fn name(&self) -> &str {
            &self.name
        }

        fn feature_dim(&self) -> usize {
            self.feature_dim
        }

        fn features(&self, input: &InputTensor) -> Result<Array1<f32>, ClassifierError> {
            let features = self.run(input)?;
            if features.len() != self.feature_dim {
                return Err(ClassifierError::Inference(format!(
                    "feature width changed: {} != {}",
                    features.len(),
                    self.feature_dim
                )));
            }
            Ok(features)
        }
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxBackbone;
