use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::enums::{CardioRisk, DrGrade, EstimateBasis};

/// One analyzed fundus image. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "ScanRecordJson")]
pub struct ScanRecord {
    pub id: Uuid,
    pub patient_id: String,
    pub patient_name: String,
    pub mobile_number: String,
    pub timestamp: DateTime<Utc>,
    pub file_url: String,
    pub grade: DrGrade,
    pub confidence: f64,
    pub biological_age: u8,
    /// Always `Heuristic` today: the age is a placeholder, not a measurement.
    pub biological_age_basis: EstimateBasis,
    pub cardiovascular_risk: CardioRisk,
}

impl ScanRecord {
    pub fn diagnosis(&self) -> &'static str {
        self.grade.label()
    }

    /// Last path segment of `file_url`, i.e. the name under the uploads directory.
    pub fn stored_file_name(&self) -> Option<&str> {
        self.file_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && *name != "..")
    }
}

/// Capture time truncated to the precision kept by the store.
pub fn capture_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Storage/wire format of a timestamp (RFC 3339, microseconds, `Z`).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Wire shape of a scan in history responses.
#[derive(Serialize)]
struct ScanRecordJson {
    #[serde(rename = "_id")]
    id: String,
    patient_id: String,
    patient_name: String,
    mobile_number: String,
    timestamp: String,
    file_url: String,
    diagnosis: String,
    dr_grade: u8,
    confidence: f64,
    biological_age: u8,
    biological_age_basis: EstimateBasis,
    cardiovascular_risk: CardioRisk,
}

impl From<ScanRecord> for ScanRecordJson {
    fn from(scan: ScanRecord) -> Self {
        Self {
            id: scan.id.to_string(),
            timestamp: format_timestamp(&scan.timestamp),
            diagnosis: scan.grade.label().to_string(),
            dr_grade: scan.grade.index(),
            patient_id: scan.patient_id,
            patient_name: scan.patient_name,
            mobile_number: scan.mobile_number,
            file_url: scan.file_url,
            confidence: scan.confidence,
            biological_age: scan.biological_age,
            biological_age_basis: scan.biological_age_basis,
            cardiovascular_risk: scan.cardiovascular_risk,
        }
    }
}
