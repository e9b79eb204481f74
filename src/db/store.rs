//! Async gateway over the scan/patient repository.
//!
//! One SQLite connection behind a mutex; every call runs on tokio's blocking
//! pool so request handlers never block the reactor on disk I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use uuid::Uuid;

use super::repository::{patient, scan};
use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;
use crate::models::{PatientSummary, ScanRecord};

#[derive(Clone)]
pub struct ScanStore {
    conn: Arc<Mutex<Connection>>,
}

impl ScanStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = open_database(path)?;
        tracing::info!(path = %path.display(), "Scan store opened");
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_memory_database()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| DatabaseError::Task(e.to_string()))?
    }

    pub async fn reconcile_patient_id(
        &self,
        mobile_number: String,
        patient_name: String,
    ) -> Result<String, DatabaseError> {
        self.with_conn(move |conn| {
            patient::reconcile_patient_id(conn, &mobile_number, &patient_name)
        })
        .await
    }

    pub async fn insert_scan(&self, record: ScanRecord) -> Result<ScanRecord, DatabaseError> {
        self.with_conn(move |conn| {
            scan::insert_scan(conn, &record)?;
            Ok(record)
        })
        .await
    }

    pub async fn get_scan(&self, id: Uuid) -> Result<ScanRecord, DatabaseError> {
        self.with_conn(move |conn| scan::get_scan(conn, &id)).await
    }

    pub async fn history(
        &self,
        patient_id: Option<String>,
    ) -> Result<Vec<ScanRecord>, DatabaseError> {
        self.with_conn(move |conn| {
            scan::list_history(conn, patient_id.as_deref(), scan::MAX_PAGE_SIZE)
        })
        .await
    }

    pub async fn roster(&self) -> Result<Vec<PatientSummary>, DatabaseError> {
        self.with_conn(|conn| scan::list_patient_roster(conn, scan::MAX_PAGE_SIZE))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;

    fn record(patient_id: &str, mobile: &str) -> ScanRecord {
        ScanRecord {
            id: Uuid::new_v4(),
            patient_id: patient_id.into(),
            patient_name: "Ada".into(),
            mobile_number: mobile.into(),
            timestamp: capture_timestamp(),
            file_url: "http://localhost:8000/uploads/a.png".into(),
            grade: DrGrade::Mild,
            confidence: 0.61,
            biological_age: 33,
            biological_age_basis: EstimateBasis::Heuristic,
            cardiovascular_risk: CardioRisk::Low,
        }
    }

    #[tokio::test]
    async fn insert_then_read_back_through_history() {
        let store = ScanStore::in_memory().unwrap();
        let patient_id = store
            .reconcile_patient_id("555-1234".into(), "Ada".into())
            .await
            .unwrap();
        let saved = store.insert_scan(record(&patient_id, "555-1234")).await.unwrap();

        let history = store.history(Some(patient_id.clone())).await.unwrap();
        assert_eq!(history, vec![saved.clone()]);
        assert_eq!(store.get_scan(saved.id).await.unwrap(), saved);

        let roster = store.roster().await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, patient_id);
    }

    #[tokio::test]
    async fn missing_scan_surfaces_not_found() {
        let store = ScanStore::in_memory().unwrap();
        let err = store.get_scan(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }
}
