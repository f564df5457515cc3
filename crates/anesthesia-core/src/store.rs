//! Persistence boundary for medication records.
//!
//! The core never talks to storage directly. A [`MedicationStore`] is the
//! request/response collaborator keyed by patient ID; [`crate::db::Database`]
//! backs it with SQLite and [`MemoryStore`] keeps everything in memory.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::AuditEntry;
use crate::db::DbError;
use crate::models::{Bolus, Cri, RateChange};

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store request timed out: {0}")]
    Timeout(String),

    #[error("Stored record not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl StoreError {
    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Timeout(_) => true,
            StoreError::NotFound(_) => false,
            StoreError::Database(DbError::Sqlite(e)) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
            ),
            StoreError::Database(_) => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Everything stored for one patient.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientRecords {
    pub cris: Vec<Cri>,
    pub boluses: Vec<Bolus>,
    /// Audit chain, in sequence order
    pub audit: Vec<AuditEntry>,
}

/// Fetch and save operations for CRIs and boluses, keyed by patient ID.
///
/// `create_*` return the ID the store assigned, which may differ from the
/// record's local ID.
pub trait MedicationStore {
    fn fetch_cris(&self, patient_id: &str) -> StoreResult<Vec<Cri>>;

    fn fetch_boluses(&self, patient_id: &str) -> StoreResult<Vec<Bolus>>;

    fn create_cri(&mut self, patient_id: &str, cri: &Cri) -> StoreResult<String>;

    fn create_bolus(&mut self, patient_id: &str, bolus: &Bolus) -> StoreResult<String>;

    fn update_cri_rate(
        &mut self,
        patient_id: &str,
        cri_id: &str,
        new_rate: f64,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    fn stop_cri(&mut self, patient_id: &str, cri_id: &str, at: DateTime<Utc>) -> StoreResult<()>;

    fn delete_bolus(&mut self, patient_id: &str, bolus_id: &str) -> StoreResult<()>;

    /// The patient's audit chain, in sequence order.
    fn fetch_audit(&self, patient_id: &str) -> StoreResult<Vec<AuditEntry>>;

    /// Append one audit entry. Entries are never updated or removed.
    fn append_audit(&mut self, patient_id: &str, entry: &AuditEntry) -> StoreResult<()>;

    /// Records and audit chain for a patient.
    fn fetch_all(&self, patient_id: &str) -> StoreResult<PatientRecords> {
        Ok(PatientRecords {
            cris: self.fetch_cris(patient_id)?,
            boluses: self.fetch_boluses(patient_id)?,
            audit: self.fetch_audit(patient_id)?,
        })
    }
}

/// In-memory store, mainly for tests and previews.
///
/// Failures can be queued with [`MemoryStore::fail_next`] and
/// [`MemoryStore::fail_after`]; each queued outcome is consumed by the next
/// call, whatever operation it is.
#[derive(Debug, Default)]
pub struct MemoryStore {
    patients: HashMap<String, PatientRecords>,
    failures: RefCell<VecDeque<Option<StoreError>>>,
    id_prefix: Option<String>,
    next_id: u64,
}

impl MemoryStore {
    /// A store that keeps the IDs records arrive with.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that assigns its own sequential IDs (`{prefix}-1`, ...).
    pub fn with_assigned_ids(prefix: &str) -> Self {
        Self {
            id_prefix: Some(prefix.to_string()),
            ..Self::default()
        }
    }

    /// Seed records for a patient without going through the trait.
    pub fn insert_records(&mut self, patient_id: &str, records: PatientRecords) {
        self.patients.insert(patient_id.to_string(), records);
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        self.failures.borrow_mut().push_back(Some(error));
    }

    /// Let `calls` calls succeed, then fail the one after with `error`.
    pub fn fail_after(&self, calls: usize, error: StoreError) {
        let mut failures = self.failures.borrow_mut();
        failures.extend(std::iter::repeat_with(|| None).take(calls));
        failures.push_back(Some(error));
    }

    pub fn records(&self, patient_id: &str) -> Option<&PatientRecords> {
        self.patients.get(patient_id)
    }

    fn take_failure(&self) -> StoreResult<()> {
        match self.failures.borrow_mut().pop_front() {
            Some(Some(error)) => Err(error),
            _ => Ok(()),
        }
    }

    fn assign_id(&mut self, local_id: &str) -> String {
        match &self.id_prefix {
            Some(prefix) => {
                self.next_id += 1;
                format!("{}-{}", prefix, self.next_id)
            }
            None => local_id.to_string(),
        }
    }

    fn cri_mut(&mut self, patient_id: &str, cri_id: &str) -> StoreResult<&mut Cri> {
        self.patients
            .get_mut(patient_id)
            .and_then(|records| records.cris.iter_mut().find(|c| c.id == cri_id))
            .ok_or_else(|| StoreError::NotFound(format!("infusion {}", cri_id)))
    }
}

impl MedicationStore for MemoryStore {
    fn fetch_cris(&self, patient_id: &str) -> StoreResult<Vec<Cri>> {
        self.take_failure()?;
        Ok(self
            .patients
            .get(patient_id)
            .map(|records| records.cris.clone())
            .unwrap_or_default())
    }

    fn fetch_boluses(&self, patient_id: &str) -> StoreResult<Vec<Bolus>> {
        self.take_failure()?;
        Ok(self
            .patients
            .get(patient_id)
            .map(|records| records.boluses.clone())
            .unwrap_or_default())
    }

    fn create_cri(&mut self, patient_id: &str, cri: &Cri) -> StoreResult<String> {
        self.take_failure()?;
        let id = self.assign_id(&cri.id);
        let mut stored = cri.clone();
        stored.id = id.clone();
        self.patients
            .entry(patient_id.to_string())
            .or_default()
            .cris
            .push(stored);
        Ok(id)
    }

    fn create_bolus(&mut self, patient_id: &str, bolus: &Bolus) -> StoreResult<String> {
        self.take_failure()?;
        let id = self.assign_id(&bolus.id);
        let mut stored = bolus.clone();
        stored.id = id.clone();
        self.patients
            .entry(patient_id.to_string())
            .or_default()
            .boluses
            .push(stored);
        Ok(id)
    }

    fn update_cri_rate(
        &mut self,
        patient_id: &str,
        cri_id: &str,
        new_rate: f64,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.take_failure()?;
        let cri = self.cri_mut(patient_id, cri_id)?;
        cri.insert_rate_change(RateChange {
            timestamp: at,
            rate: new_rate,
        });
        Ok(())
    }

    fn stop_cri(&mut self, patient_id: &str, cri_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.take_failure()?;
        let cri = self.cri_mut(patient_id, cri_id)?;
        cri.end_time = Some(at);
        Ok(())
    }

    fn delete_bolus(&mut self, patient_id: &str, bolus_id: &str) -> StoreResult<()> {
        self.take_failure()?;
        let boluses = &mut self
            .patients
            .get_mut(patient_id)
            .ok_or_else(|| StoreError::NotFound(format!("bolus {}", bolus_id)))?
            .boluses;
        let before = boluses.len();
        boluses.retain(|b| b.id != bolus_id);
        if boluses.len() == before {
            return Err(StoreError::NotFound(format!("bolus {}", bolus_id)));
        }
        Ok(())
    }

    fn fetch_audit(&self, patient_id: &str) -> StoreResult<Vec<AuditEntry>> {
        self.take_failure()?;
        Ok(self
            .patients
            .get(patient_id)
            .map(|records| records.audit.clone())
            .unwrap_or_default())
    }

    fn append_audit(&mut self, patient_id: &str, entry: &AuditEntry) -> StoreResult<()> {
        self.take_failure()?;
        self.patients
            .entry(patient_id.to_string())
            .or_default()
            .audit
            .push(entry.clone());
        Ok(())
    }
}
