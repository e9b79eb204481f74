use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::*;

/// Upper bound on rows returned by history and roster queries.
pub const MAX_PAGE_SIZE: u32 = 100;

const SCAN_COLUMNS: &str = "id, patient_id, patient_name, mobile_number, timestamp, file_url,
     dr_grade, confidence, biological_age, biological_age_basis, cardiovascular_risk";

pub fn insert_scan(conn: &Connection, scan: &ScanRecord) -> Result<(), DatabaseError> {
    if !(0.0..=1.0).contains(&scan.confidence) {
        return Err(DatabaseError::ConstraintViolation(format!(
            "confidence {} outside [0, 1]",
            scan.confidence
        )));
    }
    conn.execute(
        "INSERT INTO scans (id, patient_id, patient_name, mobile_number, timestamp, file_url,
         diagnosis, dr_grade, confidence, biological_age, biological_age_basis, cardiovascular_risk)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            scan.id.to_string(),
            scan.patient_id,
            scan.patient_name,
            scan.mobile_number,
            format_timestamp(&scan.timestamp),
            scan.file_url,
            scan.grade.label(),
            scan.grade.index(),
            scan.confidence,
            scan.biological_age,
            scan.biological_age_basis.as_str(),
            scan.cardiovascular_risk.as_str(),
        ],
    )?;
    Ok(())
}

pub fn find_scan(conn: &Connection, id: &Uuid) -> Result<Option<ScanRecord>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = ?1"),
            params![id.to_string()],
            read_scan_row,
        )
        .optional()?;
    row.map(scan_from_row).transpose()
}

pub fn get_scan(conn: &Connection, id: &Uuid) -> Result<ScanRecord, DatabaseError> {
    find_scan(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "Scan".into(),
        id: id.to_string(),
    })
}

/// Scans newest first, optionally restricted to one patient, capped at `MAX_PAGE_SIZE`.
pub fn list_history(
    conn: &Connection,
    patient_id: Option<&str>,
    limit: u32,
) -> Result<Vec<ScanRecord>, DatabaseError> {
    let limit = limit.min(MAX_PAGE_SIZE);
    let mut stmt = conn.prepare(&format!(
        "SELECT {SCAN_COLUMNS} FROM scans
         WHERE (?1 IS NULL OR patient_id = ?1)
         ORDER BY timestamp DESC, rowid DESC
         LIMIT ?2"
    ))?;

    let rows = stmt.query_map(params![patient_id, limit], read_scan_row)?;

    let mut scans = Vec::new();
    for row in rows {
        scans.push(scan_from_row(row?)?);
    }
    Ok(scans)
}

/// Patient identifier of the earliest scan recorded for a contact number.
pub fn find_patient_id_in_scans(
    conn: &Connection,
    mobile_number: &str,
) -> Result<Option<String>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT patient_id FROM scans WHERE mobile_number = ?1
             ORDER BY timestamp ASC, rowid ASC LIMIT 1",
            params![mobile_number],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(id)
}

/// Group scans by contact number. Unknown/blank numbers are excluded.
pub fn list_patient_roster(
    conn: &Connection,
    limit: u32,
) -> Result<Vec<PatientSummary>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT s.mobile_number,
                (SELECT f.patient_name FROM scans f WHERE f.mobile_number = s.mobile_number
                 ORDER BY f.timestamp ASC, f.rowid ASC LIMIT 1),
                (SELECT f.patient_id FROM scans f WHERE f.mobile_number = s.mobile_number
                 ORDER BY f.timestamp ASC, f.rowid ASC LIMIT 1),
                MAX(s.timestamp) AS last_scan,
                (SELECT l.diagnosis FROM scans l WHERE l.mobile_number = s.mobile_number
                 ORDER BY l.timestamp DESC, l.rowid DESC LIMIT 1),
                COUNT(*)
         FROM scans s
         WHERE TRIM(s.mobile_number) <> '' AND LOWER(TRIM(s.mobile_number)) <> 'unknown'
         GROUP BY s.mobile_number
         ORDER BY last_scan DESC
         LIMIT ?1",
    )?;

    let rows = stmt.query_map(params![limit.min(MAX_PAGE_SIZE)], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, u32>(5)?,
        ))
    })?;

    let mut roster = Vec::new();
    for row in rows {
        let (mobile, name, patient_id, last_scan, status, scan_count) = row?;
        roster.push(PatientSummary {
            id: patient_id,
            name,
            mobile,
            last_scan: parse_timestamp(&last_scan)?,
            status,
            scan_count,
        });
    }
    Ok(roster)
}

type ScanRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    f64,
    i64,
    String,
    String,
);

fn read_scan_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScanRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn scan_from_row(row: ScanRow) -> Result<ScanRecord, DatabaseError> {
    let (
        id,
        patient_id,
        patient_name,
        mobile_number,
        timestamp,
        file_url,
        dr_grade,
        confidence,
        biological_age,
        basis,
        risk,
    ) = row;

    Ok(ScanRecord {
        id: Uuid::parse_str(&id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        patient_id,
        patient_name,
        mobile_number,
        timestamp: parse_timestamp(&timestamp)?,
        file_url,
        grade: DrGrade::try_from(dr_grade)?,
        confidence,
        biological_age: u8::try_from(biological_age).map_err(|_| {
            DatabaseError::ConstraintViolation(format!(
                "biological_age {biological_age} out of range"
            ))
        })?,
        biological_age_basis: EstimateBasis::from_str(&basis)?,
        cardiovascular_risk: CardioRisk::from_str(&risk)?,
    })
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad timestamp '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::Duration;

    fn scan_at(
        patient_id: &str,
        name: &str,
        mobile: &str,
        grade: DrGrade,
        minutes_ago: i64,
    ) -> ScanRecord {
        ScanRecord {
            id: Uuid::new_v4(),
            patient_id: patient_id.into(),
            patient_name: name.into(),
            mobile_number: mobile.into(),
            timestamp: capture_timestamp() - Duration::minutes(minutes_ago),
            file_url: format!("http://localhost:8000/uploads/{}.png", Uuid::new_v4()),
            grade,
            confidence: 0.75,
            biological_age: 48,
            biological_age_basis: EstimateBasis::Heuristic,
            cardiovascular_risk: if grade.index() > 2 {
                CardioRisk::Moderate
            } else {
                CardioRisk::Low
            },
        }
    }

    #[test]
    fn insert_then_get_round_trips_all_fields() {
        let conn = open_memory_database().unwrap();
        let scan = scan_at("P-ABC123", "Ada", "555-1234", DrGrade::Moderate, 0);
        insert_scan(&conn, &scan).unwrap();

        let loaded = get_scan(&conn, &scan.id).unwrap();
        assert_eq!(loaded, scan);
    }

    #[test]
    fn get_unknown_scan_is_not_found() {
        let conn = open_memory_database().unwrap();
        let err = get_scan(&conn, &Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn scans_cannot_be_updated() {
        let conn = open_memory_database().unwrap();
        let scan = scan_at("P-ABC123", "Ada", "555-1234", DrGrade::Mild, 0);
        insert_scan(&conn, &scan).unwrap();

        let result = conn.execute(
            "UPDATE scans SET dr_grade = 4 WHERE id = ?1",
            params![scan.id.to_string()],
        );
        assert!(result.is_err());
        assert_eq!(get_scan(&conn, &scan.id).unwrap().grade, DrGrade::Mild);
    }

    #[test]
    fn out_of_range_confidence_rejected() {
        let conn = open_memory_database().unwrap();
        let mut scan = scan_at("P-ABC123", "Ada", "555-1234", DrGrade::Mild, 0);
        scan.confidence = 1.5;
        assert!(matches!(
            insert_scan(&conn, &scan),
            Err(DatabaseError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn history_is_newest_first_and_filterable() {
        let conn = open_memory_database().unwrap();
        let old = scan_at("P-AAAAAA", "Ada", "555-1234", DrGrade::NoDr, 30);
        let mid = scan_at("P-BBBBBB", "Bob", "555-9999", DrGrade::Severe, 20);
        let new = scan_at("P-AAAAAA", "Ada", "555-1234", DrGrade::Mild, 10);
        for s in [&old, &mid, &new] {
            insert_scan(&conn, s).unwrap();
        }

        let all = list_history(&conn, None, MAX_PAGE_SIZE).unwrap();
        let ids: Vec<Uuid> = all.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![new.id, mid.id, old.id]);

        let ada = list_history(&conn, Some("P-AAAAAA"), MAX_PAGE_SIZE).unwrap();
        assert_eq!(ada.len(), 2);
        assert!(ada.iter().all(|s| s.patient_id == "P-AAAAAA"));
        assert_eq!(ada[0].id, new.id);
    }

    #[test]
    fn history_capped_at_page_size() {
        let conn = open_memory_database().unwrap();
        for i in 0..105 {
            insert_scan(&conn, &scan_at("P-CAPCAP", "Cap", "1", DrGrade::NoDr, i)).unwrap();
        }
        assert_eq!(list_history(&conn, None, 500).unwrap().len(), 100);
        assert_eq!(list_history(&conn, None, 5).unwrap().len(), 5);
    }

    #[test]
    fn roster_groups_by_mobile_and_skips_unknown() {
        let conn = open_memory_database().unwrap();
        insert_scan(&conn, &scan_at("P-AAAAAA", "Ada", "555-1234", DrGrade::NoDr, 30)).unwrap();
        insert_scan(&conn, &scan_at("P-AAAAAA", "Ada L.", "555-1234", DrGrade::Severe, 5)).unwrap();
        insert_scan(&conn, &scan_at("P-BBBBBB", "Bob", "555-9999", DrGrade::Mild, 20)).unwrap();
        insert_scan(&conn, &scan_at("P-XXXXXX", "Anon", "Unknown", DrGrade::Mild, 1)).unwrap();
        insert_scan(&conn, &scan_at("P-YYYYYY", "Blank", "", DrGrade::Mild, 2)).unwrap();

        let roster = list_patient_roster(&conn, MAX_PAGE_SIZE).unwrap();
        assert_eq!(roster.len(), 2);

        let ada = &roster[0];
        assert_eq!(ada.mobile, "555-1234");
        assert_eq!(ada.id, "P-AAAAAA");
        assert_eq!(ada.name, "Ada");
        assert_eq!(ada.status, "Severe");
        assert_eq!(ada.scan_count, 2);

        let bob = &roster[1];
        assert_eq!(bob.mobile, "555-9999");
        assert_eq!(bob.scan_count, 1);
        assert!(ada.last_scan > bob.last_scan);
    }

    #[test]
    fn earliest_scan_supplies_patient_id() {
        let conn = open_memory_database().unwrap();
        insert_scan(&conn, &scan_at("P-FIRST1", "Ada", "555-1234", DrGrade::NoDr, 30)).unwrap();
        insert_scan(&conn, &scan_at("P-LATER2", "Ada", "555-1234", DrGrade::NoDr, 5)).unwrap();
        assert_eq!(
            find_patient_id_in_scans(&conn, "555-1234").unwrap().as_deref(),
            Some("P-FIRST1")
        );
        assert_eq!(find_patient_id_in_scans(&conn, "000").unwrap(), None);
    }
}
