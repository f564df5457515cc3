//! Audit chain database operations.

use rusqlite::params;

use super::{Database, DbError, DbResult};
use crate::audit::AuditEntry;

impl Database {
    /// Append one audit entry for a patient.
    ///
    /// Sequences are unique per patient; writing the same position twice is
    /// a constraint violation.
    pub fn insert_audit_entry(&self, patient_id: &str, entry: &AuditEntry) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO audit_entries (patient_id, sequence, payload, prev_hash, hash)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    patient_id,
                    entry.sequence as i64,
                    entry.payload,
                    entry.prev_hash,
                    entry.hash,
                ],
            )
            .map_err(|e| match e.sqlite_error_code() {
                Some(rusqlite::ErrorCode::ConstraintViolation) => DbError::Constraint(format!(
                    "audit entry {} already recorded for {}",
                    entry.sequence, patient_id
                )),
                _ => DbError::Sqlite(e),
            })?;
        Ok(())
    }

    /// A patient's audit entries in chain order.
    pub fn list_audit_entries(&self, patient_id: &str) -> DbResult<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT sequence, payload, prev_hash, hash
            FROM audit_entries
            WHERE patient_id = ?
            ORDER BY sequence
            "#,
        )?;

        let rows = stmt.query_map([patient_id], |row| {
            Ok(AuditEntry {
                sequence: row.get::<_, i64>(0)? as u64,
                payload: row.get(1)?,
                prev_hash: row.get(2)?,
                hash: row.get(3)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::models::Bolus;
    use crate::registry::MedicationEvent;
    use chrono::{TimeZone, Utc};

    fn bolus_event() -> MedicationEvent {
        MedicationEvent::BolusRecorded {
            bolus: Bolus::new(
                "Propofol".into(),
                40.0,
                "mg".into(),
                "Dr. Smith".into(),
                Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            ),
        }
    }

    #[test]
    fn test_audit_entries_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let mut log = AuditLog::new();
        log.append(&bolus_event()).unwrap();
        log.append(&bolus_event()).unwrap();

        for entry in log.entries() {
            db.insert_audit_entry("patient-1", entry).unwrap();
        }

        let stored = db.list_audit_entries("patient-1").unwrap();
        assert_eq!(stored, log.entries());
        assert!(AuditLog::from_entries(stored).verify());
        assert!(db.list_audit_entries("patient-2").unwrap().is_empty());
    }

    #[test]
    fn test_audit_entries_are_append_only() {
        let db = Database::open_in_memory().unwrap();
        let mut log = AuditLog::new();
        let entry = log.append(&bolus_event()).unwrap().clone();
        db.insert_audit_entry("patient-1", &entry).unwrap();

        assert!(matches!(
            db.insert_audit_entry("patient-1", &entry),
            Err(DbError::Constraint(_))
        ));
        assert!(db
            .conn()
            .execute("UPDATE audit_entries SET payload = '{}'", [])
            .is_err());
        assert!(db.conn().execute("DELETE FROM audit_entries", []).is_err());
    }
}
