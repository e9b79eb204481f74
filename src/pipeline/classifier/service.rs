use std::sync::Arc;

use tokio::sync::OnceCell;

use super::{ClassifierError, ModelSpec, Prediction, RetinaClassifier};
use crate::models::enums::WeightsBasis;
use crate::pipeline::preprocess::InputTensor;

/// Shared, lazily initialised classifier.
///
/// The model is built at most once; concurrent first callers wait on the same
/// initialisation. A failed load leaves the cell empty so the next request retries.
/// Loading and inference both run on the blocking pool.
pub struct ClassifierService {
    spec: ModelSpec,
    model: OnceCell<Arc<RetinaClassifier>>,
}

impl ClassifierService {
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            model: OnceCell::new(),
        }
    }

    /// Wrap an already-built model.
    pub fn with_model(spec: ModelSpec, model: RetinaClassifier) -> Self {
        Self {
            spec,
            model: OnceCell::new_with(Some(Arc::new(model))),
        }
    }

    pub async fn model(&self) -> Result<Arc<RetinaClassifier>, ClassifierError> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let spec = self.spec.clone();
                let model = tokio::task::spawn_blocking(move || RetinaClassifier::load(&spec))
                    .await
                    .map_err(|e| ClassifierError::Task(e.to_string()))??;
                Ok::<_, ClassifierError>(Arc::new(model))
            })
            .await?;
        Ok(Arc::clone(model))
    }

    pub async fn predict(&self, input: InputTensor) -> Result<Prediction, ClassifierError> {
        let model = self.model().await?;
        tokio::task::spawn_blocking(move || model.predict(&input))
            .await
            .map_err(|e| ClassifierError::Task(e.to_string()))?
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// `None` until the first successful load.
    pub fn weights_basis(&self) -> Option<WeightsBasis> {
        self.model.get().map(|m| m.basis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::DrGrade;
    use crate::pipeline::classifier::{test_support, BackboneKind};

    fn spec_in(dir: &std::path::Path) -> ModelSpec {
        ModelSpec {
            backbone: BackboneKind::PatchStats,
            weights_path: dir.join("retinet_v1.json"),
        }
    }

    #[tokio::test]
    async fn loads_lazily_on_first_predict() {
        let dir = tempfile::tempdir().unwrap();
        let service = ClassifierService::new(spec_in(dir.path()));
        assert!(!service.is_loaded());
        assert_eq!(service.weights_basis(), None);

        service.predict(InputTensor::zeros((1, 3, 224, 224))).await.unwrap();
        assert!(service.is_loaded());
        assert_eq!(service.weights_basis(), Some(WeightsBasis::Unspecialized));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_model() {
        let dir = tempfile::tempdir().unwrap();
        test_support::write_biased_head(&dir.path().join("retinet_v1.json"), DrGrade::Mild);
        let service = Arc::new(ClassifierService::new(spec_in(dir.path())));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move { service.model().await.unwrap() }));
        }
        let mut models = Vec::new();
        for handle in handles {
            models.push(handle.await.unwrap());
        }
        assert!(models.iter().all(|m| Arc::ptr_eq(m, &models[0])));

        let prediction = service
            .predict(InputTensor::zeros((1, 3, 224, 224)))
            .await
            .unwrap();
        assert_eq!(prediction.grade, DrGrade::Mild);
    }

    #[tokio::test]
    async fn failed_load_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("retinet_v1.json");
        std::fs::write(&weights, b"garbage").unwrap();
        let service = ClassifierService::new(spec_in(dir.path()));

        assert!(service.model().await.is_err());
        assert!(!service.is_loaded());

        std::fs::remove_file(&weights).unwrap();
        assert!(service.model().await.is_ok());
    }
}
