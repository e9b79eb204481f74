//! One upload from bytes to a persisted scan:
//! normalize inputs → preprocess → store image → classify → aggregate →
//! reconcile patient → insert record.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use super::classifier::{ClassifierError, ClassifierService};
use super::diagnosis::{aggregate, Diagnosis};
use super::preprocess::{preprocess, InputTensor, PreprocessError};
use crate::config::ServiceConfig;
use crate::db::{DatabaseError, ScanStore};
use crate::models::patient::{UNKNOWN_MOBILE, UNKNOWN_PATIENT_NAME};
use crate::models::scan::{capture_timestamp, ScanRecord};

/// Longest sanitized client file name kept in the stored name.
const MAX_STORED_NAME_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid image: {0}")]
    InvalidImage(#[from] PreprocessError),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(#[source] ClassifierError),

    #[error("Inference failed: {0}")]
    Inference(#[source] ClassifierError),

    #[error("Cannot store upload: {0}")]
    Upload(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Analysis task failed: {0}")]
    Task(String),
}

/// An uploaded fundus photograph plus optional patient metadata.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
    pub patient_name: Option<String>,
    pub mobile_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub record: ScanRecord,
    pub diagnosis: Diagnosis,
}

#[derive(Clone)]
pub struct AnalysisPipeline {
    config: Arc<ServiceConfig>,
    classifier: Arc<ClassifierService>,
    store: ScanStore,
}

impl AnalysisPipeline {
    pub fn new(
        config: Arc<ServiceConfig>,
        classifier: Arc<ClassifierService>,
        store: ScanStore,
    ) -> Self {
        Self {
            config,
            classifier,
            store,
        }
    }

    pub async fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let patient_name = normalize_field(request.patient_name.as_deref(), UNKNOWN_PATIENT_NAME);
        let mobile_number = normalize_field(request.mobile_number.as_deref(), UNKNOWN_MOBILE);

        let (tensor, bytes) = tokio::task::spawn_blocking(move || {
            preprocess(&request.bytes).map(|tensor| (tensor, request.bytes))
        })
        .await
        .map_err(|e| AnalysisError::Task(e.to_string()))??;

        let stored_name = stored_file_name(request.file_name.as_deref());
        let stored_path = self.config.uploads_dir.join(&stored_name);
        save_upload(&stored_path, &bytes).await?;

        match self
            .classify_and_persist(tensor, &stored_name, patient_name, mobile_number)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // No scan references the file; drop it.
                if let Err(rm) = tokio::fs::remove_file(&stored_path).await {
                    tracing::warn!(
                        path = %stored_path.display(),
                        error = %rm,
                        "Failed to remove orphaned upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn classify_and_persist(
        &self,
        tensor: InputTensor,
        stored_name: &str,
        patient_name: String,
        mobile_number: String,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        self.classifier
            .model()
            .await
            .map_err(AnalysisError::ModelUnavailable)?;
        let prediction = self
            .classifier
            .predict(tensor)
            .await
            .map_err(AnalysisError::Inference)?;

        let diagnosis = aggregate(&prediction, &mut rand::thread_rng());

        let patient_id = self
            .store
            .reconcile_patient_id(mobile_number.clone(), patient_name.clone())
            .await?;

        let record = ScanRecord {
            id: Uuid::new_v4(),
            patient_id,
            patient_name,
            mobile_number,
            timestamp: capture_timestamp(),
            file_url: self.config.file_url(stored_name),
            grade: diagnosis.grade,
            confidence: diagnosis.confidence,
            biological_age: diagnosis.biological_age,
            biological_age_basis: diagnosis.biological_age_basis,
            cardiovascular_risk: diagnosis.cardiovascular_risk,
        };
        let record = self.store.insert_scan(record).await?;

        tracing::info!(
            scan_id = %record.id,
            patient_id = %record.patient_id,
            grade = record.grade.index(),
            confidence = record.confidence,
            "Scan analyzed"
        );

        Ok(AnalysisOutcome { record, diagnosis })
    }
}

/// Trimmed value, or `default` when absent or blank.
fn normalize_field(value: Option<&str>, default: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// `{uuid}_{sanitized client name}`; only `[A-Za-z0-9._-]` survive.
pub fn stored_file_name(client_name: Option<&str>) -> String {
    let base = client_name
        .map(|name| name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name))
        .unwrap_or("");
    let mut sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STORED_NAME_LEN)
        .collect();
    if sanitized.trim_matches(|c: char| c == '.' || c == '_').is_empty() {
        sanitized = "scan".to_string();
    }
    format!("{}_{}", Uuid::new_v4(), sanitized)
}

async fn save_upload(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}
