use chrono::{DateTime, Utc};
use serde::Serialize;

/// Contact-number sentinel used when the client does not supply one.
pub const UNKNOWN_MOBILE: &str = "Unknown";

/// Default patient name for anonymous uploads.
pub const UNKNOWN_PATIENT_NAME: &str = "Unknown Patient";

/// True when the number can key a patient identity.
pub fn is_known_mobile(mobile: &str) -> bool {
    let trimmed = mobile.trim();
    !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case(UNKNOWN_MOBILE)
}

/// Authoritative identity row, keyed by contact number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patient {
    pub patient_id: String,
    pub mobile_number: String,
    pub patient_name: String,
    pub created_at: DateTime<Utc>,
}

/// One roster entry: every scan sharing a contact number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub id: String,
    pub name: String,
    pub mobile: String,
    pub last_scan: DateTime<Utc>,
    /// Diagnosis label of the most recent scan.
    pub status: String,
    pub scan_count: u32,
}
