use std::path::Path;

use rusqlite::Connection;

use super::DatabaseError;

/// Milliseconds a writer waits on a locked database before failing.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Open a SQLite connection to the given path and run migrations
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConstraintViolation(format!(
                    "Cannot create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
    }
    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(&format!(
        "PRAGMA busy_timeout={BUSY_TIMEOUT_MS};
         PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;"
    ))?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_current_version(conn);

    let migrations: Vec<(i64, &str)> = vec![(
        1,
        include_str!("../../resources/migrations/001_initial.sql"),
    )];

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql).map_err(|e| DatabaseError::MigrationFailed {
                version,
                reason: e.to_string(),
            })?;
        }
    }

    Ok(())
}

/// Get the current schema version (0 if no schema exists yet)
fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get::<_, i64>(0),
    )
    .unwrap_or(0)
}

/// Count tables in the database (for verification)
pub fn count_tables(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_initializes_all_tables() {
        let conn = open_memory_database().unwrap();
        // schema_version + patients + scans
        let count = count_tables(&conn).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn schema_version_is_current() {
        let conn = open_memory_database().unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn migration_idempotent() {
        let conn = open_memory_database().unwrap();
        // Run migrations again, should not error
        let result = run_migrations(&conn);
        assert!(result.is_ok());
    }

    #[test]
    fn file_database_created_with_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("retinet.db");
        let conn = open_database(&path).unwrap();
        assert!(path.exists());
        assert_eq!(count_tables(&conn).unwrap(), 3);
    }

    #[test]
    fn grade_outside_range_rejected_by_schema() {
        let conn = open_memory_database().unwrap();
        let result = conn.execute(
            "INSERT INTO scans (id, patient_id, patient_name, mobile_number, timestamp, file_url,
             diagnosis, dr_grade, confidence, biological_age, cardiovascular_risk)
             VALUES ('s1', 'P-1', 'n', 'm', '2026-01-01T00:00:00Z', 'u', 'x', 9, 0.5, 40, 'Low')",
            [],
        );
        assert!(result.is_err());
    }
}
