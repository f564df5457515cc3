//! Infusion and bolus database operations.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::audit::AuditEntry;
use crate::models::{Bolus, Cri, RateChange};
use crate::store::{MedicationStore, StoreError, StoreResult};

impl Database {
    /// Insert an infusion and its full rate history.
    pub fn insert_cri(&mut self, patient_id: &str, cri: &Cri) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO cri_infusions (
                id, patient_id, name, rate, unit,
                start_time, end_time, administered_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                cri.id,
                patient_id,
                cri.name,
                cri.rate,
                cri.unit,
                format_timestamp(cri.start_time),
                cri.end_time.map(format_timestamp),
                cri.administered_by,
            ],
        )
        .map_err(|e| duplicate_as_constraint(e, "infusion", &cri.id))?;
        for change in &cri.rate_history {
            tx.execute(
                "INSERT INTO cri_rate_history (cri_id, timestamp, rate) VALUES (?1, ?2, ?3)",
                params![cri.id, format_timestamp(change.timestamp), change.rate],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Append a rate change and refresh the stored current rate.
    pub fn insert_rate_change(
        &mut self,
        patient_id: &str,
        cri_id: &str,
        change: RateChange,
    ) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM cri_infusions WHERE id = ?1 AND patient_id = ?2",
                params![cri_id, patient_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(DbError::NotFound(format!("infusion {}", cri_id)));
        }

        tx.execute(
            "INSERT INTO cri_rate_history (cri_id, timestamp, rate) VALUES (?1, ?2, ?3)",
            params![cri_id, format_timestamp(change.timestamp), change.rate],
        )?;
        tx.execute(
            r#"
            UPDATE cri_infusions SET rate = (
                SELECT rate FROM cri_rate_history
                WHERE cri_id = ?1
                ORDER BY timestamp DESC, id DESC
                LIMIT 1
            )
            WHERE id = ?1
            "#,
            [cri_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Set an infusion's end time.
    pub fn set_cri_end_time(
        &self,
        patient_id: &str,
        cri_id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let rows_affected = self.conn.execute(
            "UPDATE cri_infusions SET end_time = ?3 WHERE id = ?1 AND patient_id = ?2",
            params![cri_id, patient_id, format_timestamp(at)],
        )?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("infusion {}", cri_id)));
        }
        Ok(())
    }

    /// List a patient's infusions in insertion order, with their histories.
    pub fn list_cris_for_patient(&self, patient_id: &str) -> DbResult<Vec<Cri>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, name, rate, unit, start_time, end_time, administered_by
            FROM cri_infusions
            WHERE patient_id = ?
            ORDER BY rowid
            "#,
        )?;

        let rows = stmt.query_map([patient_id], |row| {
            Ok(CriRow {
                id: row.get(0)?,
                name: row.get(1)?,
                rate: row.get(2)?,
                unit: row.get(3)?,
                start_time: row.get(4)?,
                end_time: row.get(5)?,
                administered_by: row.get(6)?,
            })
        })?;

        let mut cris = Vec::new();
        for row in rows {
            let mut cri: Cri = row?.try_into()?;
            cri.rate_history = self.rate_history(&cri.id)?;
            if let Some(last) = cri.rate_history.last() {
                cri.rate = last.rate;
            }
            cris.push(cri);
        }
        Ok(cris)
    }

    fn rate_history(&self, cri_id: &str) -> DbResult<Vec<RateChange>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, rate
            FROM cri_rate_history
            WHERE cri_id = ?
            ORDER BY timestamp, id
            "#,
        )?;

        let rows = stmt.query_map([cri_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (timestamp, rate) = row?;
            history.push(RateChange {
                timestamp: parse_timestamp(&timestamp)?,
                rate,
            });
        }
        Ok(history)
    }

    /// Insert a bolus.
    pub fn insert_bolus(&self, patient_id: &str, bolus: &Bolus) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO boluses (
                id, patient_id, name, dose, unit, timestamp, administered_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                bolus.id,
                patient_id,
                bolus.name,
                bolus.dose,
                bolus.unit,
                format_timestamp(bolus.timestamp),
                bolus.administered_by,
            ],
        )
        .map_err(|e| duplicate_as_constraint(e, "bolus", &bolus.id))?;
        Ok(())
    }

    /// List a patient's boluses in insertion order.
    pub fn list_boluses_for_patient(&self, patient_id: &str) -> DbResult<Vec<Bolus>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, name, dose, unit, timestamp, administered_by
            FROM boluses
            WHERE patient_id = ?
            ORDER BY rowid
            "#,
        )?;

        let rows = stmt.query_map([patient_id], |row| {
            Ok(BolusRow {
                id: row.get(0)?,
                name: row.get(1)?,
                dose: row.get(2)?,
                unit: row.get(3)?,
                timestamp: row.get(4)?,
                administered_by: row.get(5)?,
            })
        })?;

        let mut boluses = Vec::new();
        for row in rows {
            boluses.push(row?.try_into()?);
        }
        Ok(boluses)
    }

    /// Delete a bolus.
    pub fn remove_bolus(&self, patient_id: &str, bolus_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "DELETE FROM boluses WHERE id = ?1 AND patient_id = ?2",
            params![bolus_id, patient_id],
        )?;
        Ok(rows_affected > 0)
    }
}

impl MedicationStore for Database {
    fn fetch_cris(&self, patient_id: &str) -> StoreResult<Vec<Cri>> {
        self.list_cris_for_patient(patient_id).map_err(into_store_error)
    }

    fn fetch_boluses(&self, patient_id: &str) -> StoreResult<Vec<Bolus>> {
        self.list_boluses_for_patient(patient_id)
            .map_err(into_store_error)
    }

    fn create_cri(&mut self, patient_id: &str, cri: &Cri) -> StoreResult<String> {
        self.insert_cri(patient_id, cri).map_err(into_store_error)?;
        Ok(cri.id.clone())
    }

    fn create_bolus(&mut self, patient_id: &str, bolus: &Bolus) -> StoreResult<String> {
        self.insert_bolus(patient_id, bolus)
            .map_err(into_store_error)?;
        Ok(bolus.id.clone())
    }

    fn update_cri_rate(
        &mut self,
        patient_id: &str,
        cri_id: &str,
        new_rate: f64,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let change = RateChange {
            timestamp: at,
            rate: new_rate,
        };
        self.insert_rate_change(patient_id, cri_id, change)
            .map_err(into_store_error)
    }

    fn stop_cri(&mut self, patient_id: &str, cri_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.set_cri_end_time(patient_id, cri_id, at)
            .map_err(into_store_error)
    }

    fn delete_bolus(&mut self, patient_id: &str, bolus_id: &str) -> StoreResult<()> {
        if !self
            .remove_bolus(patient_id, bolus_id)
            .map_err(into_store_error)?
        {
            return Err(StoreError::NotFound(format!("bolus {}", bolus_id)));
        }
        Ok(())
    }

    fn fetch_audit(&self, patient_id: &str) -> StoreResult<Vec<AuditEntry>> {
        self.list_audit_entries(patient_id).map_err(into_store_error)
    }

    fn append_audit(&mut self, patient_id: &str, entry: &AuditEntry) -> StoreResult<()> {
        self.insert_audit_entry(patient_id, entry)
            .map_err(into_store_error)
    }
}

fn into_store_error(e: DbError) -> StoreError {
    match e {
        DbError::NotFound(what) => StoreError::NotFound(what),
        other => StoreError::Database(other),
    }
}

fn duplicate_as_constraint(e: rusqlite::Error, kind: &str, id: &str) -> DbError {
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => {
            DbError::Constraint(format!("{} {} already exists", kind, id))
        }
        _ => DbError::Sqlite(e),
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|source| DbError::Timestamp {
            value: value.to_string(),
            source,
        })
}

/// Intermediate row struct for database mapping.
struct CriRow {
    id: String,
    name: String,
    rate: f64,
    unit: String,
    start_time: String,
    end_time: Option<String>,
    administered_by: String,
}

impl TryFrom<CriRow> for Cri {
    type Error = DbError;

    fn try_from(row: CriRow) -> Result<Self, Self::Error> {
        Ok(Cri {
            id: row.id,
            name: row.name,
            rate: row.rate,
            unit: row.unit,
            start_time: parse_timestamp(&row.start_time)?,
            end_time: row.end_time.as_deref().map(parse_timestamp).transpose()?,
            rate_history: Vec::new(),
            administered_by: row.administered_by,
        })
    }
}

/// Intermediate row struct for database mapping.
struct BolusRow {
    id: String,
    name: String,
    dose: f64,
    unit: String,
    timestamp: String,
    administered_by: String,
}

impl TryFrom<BolusRow> for Bolus {
    type Error = DbError;

    fn try_from(row: BolusRow) -> Result<Self, Self::Error> {
        Ok(Bolus {
            id: row.id,
            name: row.name,
            dose: row.dose,
            unit: row.unit,
            timestamp: parse_timestamp(&row.timestamp)?,
            administered_by: row.administered_by,
        })
    }
}
