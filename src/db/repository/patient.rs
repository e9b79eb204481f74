use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use super::scan::{find_patient_id_in_scans, parse_timestamp};
use crate::db::DatabaseError;
use crate::models::*;

/// Attempts at finding an unused identifier before giving up.
const MINT_ATTEMPTS: usize = 8;

/// Fresh identifier of the form `P-1A2B3C`.
pub fn mint_patient_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("P-{}", hex[..6].to_uppercase())
}

pub fn find_patient_by_mobile(
    conn: &Connection,
    mobile_number: &str,
) -> Result<Option<Patient>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT patient_id, mobile_number, patient_name, created_at
             FROM patients WHERE mobile_number = ?1",
            params![mobile_number],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(patient_id, mobile_number, patient_name, created_at)| {
        Ok(Patient {
            patient_id,
            mobile_number,
            patient_name,
            created_at: parse_timestamp(&created_at)?,
        })
    })
    .transpose()
}

/// Resolve the patient identifier for a new analysis.
///
/// Unknown/blank numbers always get a fresh identifier and no identity row.
/// Otherwise lookup-then-insert runs in one IMMEDIATE transaction against the
/// UNIQUE `mobile_number` column, so concurrent first visits converge on a
/// single identifier. Scans recorded before the identity row existed keep
/// their identifier.
pub fn reconcile_patient_id(
    conn: &mut Connection,
    mobile_number: &str,
    patient_name: &str,
) -> Result<String, DatabaseError> {
    if !is_known_mobile(mobile_number) {
        return Ok(mint_patient_id());
    }
    let mobile_number = mobile_number.trim();

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(existing) = find_patient_by_mobile(&tx, mobile_number)? {
        tx.commit()?;
        return Ok(existing.patient_id);
    }

    let candidate = match find_patient_id_in_scans(&tx, mobile_number)? {
        Some(legacy) => legacy,
        None => mint_unused_patient_id(&tx)?,
    };

    tx.execute(
        "INSERT INTO patients (patient_id, mobile_number, patient_name, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(mobile_number) DO NOTHING",
        params![
            candidate,
            mobile_number,
            patient_name,
            format_timestamp(&capture_timestamp()),
        ],
    )?;

    let patient_id: String = tx.query_row(
        "SELECT patient_id FROM patients WHERE mobile_number = ?1",
        params![mobile_number],
        |row| row.get(0),
    )?;
    tx.commit()?;

    tracing::debug!(%patient_id, "Patient identity registered");
    Ok(patient_id)
}

fn mint_unused_patient_id(conn: &Connection) -> Result<String, DatabaseError> {
    for _ in 0..MINT_ATTEMPTS {
        let candidate = mint_patient_id();
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM patients WHERE patient_id = ?1)
                 OR EXISTS(SELECT 1 FROM scans WHERE patient_id = ?1)",
            params![candidate],
            |row| row.get(0),
        )?;
        if !taken {
            return Ok(candidate);
        }
    }
    Err(DatabaseError::ConstraintViolation(
        "could not mint an unused patient identifier".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::scan::insert_scan;
    use crate::db::sqlite::{open_database, open_memory_database};

    #[test]
    fn minted_ids_have_expected_shape() {
        let id = mint_patient_id();
        assert_eq!(id.len(), 8);
        assert!(id.starts_with("P-"));
        assert!(id[2..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn same_mobile_reuses_identifier() {
        let mut conn = open_memory_database().unwrap();
        let first = reconcile_patient_id(&mut conn, "555-1234", "Ada").unwrap();
        let second = reconcile_patient_id(&mut conn, "555-1234", "Ada Lovelace").unwrap();
        assert_eq!(first, second);

        let patient = find_patient_by_mobile(&conn, "555-1234").unwrap().unwrap();
        assert_eq!(patient.patient_id, first);
        assert_eq!(patient.patient_name, "Ada");
    }

    #[test]
    fn different_mobiles_get_different_identifiers() {
        let mut conn = open_memory_database().unwrap();
        let a = reconcile_patient_id(&mut conn, "555-1234", "Ada").unwrap();
        let b = reconcile_patient_id(&mut conn, "555-9999", "Bob").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_mobile_always_mints_and_stores_nothing() {
        let mut conn = open_memory_database().unwrap();
        let a = reconcile_patient_id(&mut conn, "Unknown", "Anon").unwrap();
        let b = reconcile_patient_id(&mut conn, "Unknown", "Anon").unwrap();
        assert_ne!(a, b);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn legacy_scan_identifier_is_adopted() {
        let mut conn = open_memory_database().unwrap();
        let legacy = ScanRecord {
            id: Uuid::new_v4(),
            patient_id: "P-LEGACY".into(),
            patient_name: "Ada".into(),
            mobile_number: "555-1234".into(),
            timestamp: capture_timestamp(),
            file_url: "http://localhost:8000/uploads/x.png".into(),
            grade: DrGrade::NoDr,
            confidence: 0.9,
            biological_age: 40,
            biological_age_basis: EstimateBasis::Heuristic,
            cardiovascular_risk: CardioRisk::Low,
        };
        insert_scan(&conn, &legacy).unwrap();

        let id = reconcile_patient_id(&mut conn, "555-1234", "Ada").unwrap();
        assert_eq!(id, "P-LEGACY");
    }

    #[test]
    fn concurrent_first_visits_converge() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("retinet.db");
        open_database(&path).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut conn = open_database(&path).unwrap();
                    reconcile_patient_id(&mut conn, "555-0000", "Race").unwrap()
                })
            })
            .collect();

        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]), "ids diverged: {ids:?}");
    }
}
