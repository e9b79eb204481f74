//! Shared state and response shapes for the API layer.

use std::sync::Arc;

use serde::Serialize;

use crate::config::ServiceConfig;
use crate::db::ScanStore;
use crate::models::enums::{CardioRisk, EstimateBasis};
use crate::pipeline::analysis::{AnalysisOutcome, AnalysisPipeline};
use crate::pipeline::classifier::{BackboneKind, ClassifierService, ModelSpec};

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes. Cheap to clone.
#[derive(Clone)]
pub struct ApiContext {
    pub config: Arc<ServiceConfig>,
    pub store: ScanStore,
    pub classifier: Arc<ClassifierService>,
    pub analysis: AnalysisPipeline,
}

impl ApiContext {
    /// Wire the classifier described by `config`. The model itself loads
    /// lazily on the first analysis.
    pub fn new(config: ServiceConfig, store: ScanStore) -> Self {
        let spec = ModelSpec {
            backbone: BackboneKind::from_config(config.backbone_path.as_deref()),
            weights_path: config.weights_path.clone(),
        };
        Self::with_classifier(config, store, ClassifierService::new(spec))
    }

    pub fn with_classifier(
        config: ServiceConfig,
        store: ScanStore,
        classifier: ClassifierService,
    ) -> Self {
        let config = Arc::new(config);
        let classifier = Arc::new(classifier);
        let analysis =
            AnalysisPipeline::new(Arc::clone(&config), Arc::clone(&classifier), store.clone());
        Self {
            config,
            store,
            classifier,
            analysis,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Analyze response
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub status: &'static str,
    pub scan_id: String,
    pub patient_id: String,
    pub file_url: String,
    pub results: AnalysisResults,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResults {
    pub diabetic_retinopathy: RetinopathyResult,
    pub biological_age: BiologicalAgeResult,
    pub cardiovascular_risk: CardioRisk,
    pub diseases_found: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RetinopathyResult {
    pub grade: &'static str,
    pub grade_index: u8,
    pub confidence: f64,
    pub is_normal: bool,
}

#[derive(Debug, Serialize)]
pub struct BiologicalAgeResult {
    pub predicted: u8,
    /// Needs a chronological age, which is not collected.
    pub gap: Option<i16>,
    pub basis: EstimateBasis,
}

impl From<AnalysisOutcome> for AnalyzeResponse {
    fn from(outcome: AnalysisOutcome) -> Self {
        let AnalysisOutcome { record, diagnosis } = outcome;
        Self {
            status: "success",
            scan_id: record.id.to_string(),
            patient_id: record.patient_id,
            file_url: record.file_url,
            results: AnalysisResults {
                diabetic_retinopathy: RetinopathyResult {
                    grade: diagnosis.label(),
                    grade_index: diagnosis.grade.index(),
                    confidence: diagnosis.confidence,
                    is_normal: diagnosis.is_normal(),
                },
                biological_age: BiologicalAgeResult {
                    predicted: diagnosis.biological_age,
                    gap: None,
                    basis: diagnosis.biological_age_basis,
                },
                cardiovascular_risk: diagnosis.cardiovascular_risk,
                diseases_found: diagnosis.diseases_found,
            },
        }
    }
}
