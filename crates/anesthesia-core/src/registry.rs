//! In-memory medication registry for one patient.
//!
//! All mutations go through [`MedicationRegistry::apply`]: a command is
//! validated into an event, the event is written to the audit chain, and
//! only then is the state changed. A rejected command leaves the registry
//! untouched.
//!
//! Instants are truncated to whole milliseconds on the way in, the precision
//! the store keeps, so a record reads back exactly as it was committed.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::audit::{AuditError, AuditLog};
use crate::models::{Bolus, Cri, RateChange};

/// Registry errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Infusion already stopped: {0}")]
    AlreadyStopped(String),

    #[error("Audit log error: {0}")]
    Audit(String),
}

impl From<AuditError> for RegistryError {
    fn from(e: AuditError) -> Self {
        RegistryError::Audit(e.to_string())
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// A requested change to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum MedicationCommand {
    StartCri {
        name: String,
        rate: f64,
        unit: String,
        administered_by: String,
        at: DateTime<Utc>,
    },
    ChangeCriRate {
        cri_id: String,
        rate: f64,
        at: DateTime<Utc>,
    },
    StopCri {
        cri_id: String,
        at: DateTime<Utc>,
    },
    RecordBolus {
        name: String,
        dose: f64,
        unit: String,
        administered_by: String,
        at: DateTime<Utc>,
    },
    DeleteBolus {
        bolus_id: String,
    },
}

/// A change the registry accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MedicationEvent {
    CriStarted { cri: Cri },
    CriRateChanged { cri_id: String, change: RateChange },
    CriStopped { cri_id: String, at: DateTime<Utc> },
    BolusRecorded { bolus: Bolus },
    BolusDeleted { bolus_id: String },
}

/// CRIs and boluses for one patient.
#[derive(Debug, Clone, Default)]
pub struct MedicationRegistry {
    cris: Vec<Cri>,
    boluses: Vec<Bolus>,
    audit: AuditLog,
    revision: u64,
}

impl MedicationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from stored records.
    ///
    /// Rate histories are normalized; an infusion that ends before it starts
    /// is rejected.
    pub fn from_records(cris: Vec<Cri>, boluses: Vec<Bolus>) -> RegistryResult<Self> {
        let mut normalized = Vec::with_capacity(cris.len());
        for mut cri in cris {
            if cri.end_time.is_some_and(|end| end < cri.start_time) {
                return Err(RegistryError::Validation(format!(
                    "infusion {} ends before it starts",
                    cri.id
                )));
            }
            cri.normalize();
            normalized.push(cri);
        }

        Ok(Self {
            cris: normalized,
            boluses,
            audit: AuditLog::new(),
            revision: 0,
        })
    }

    /// Attach a previously recorded audit chain. Later events extend it.
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    /// Apply a command. `Ok(None)` means the command was accepted but
    /// changed nothing (e.g. stopping an infusion that is already stopped).
    pub fn apply(&mut self, command: MedicationCommand) -> RegistryResult<Option<MedicationEvent>> {
        let event = match self.plan(command) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(None),
            Err(e) => {
                debug!(error = %e, "medication command rejected");
                return Err(e);
            }
        };

        let entry = self.audit.prepare(&event)?;
        self.commit(&event);
        self.audit.push(entry);
        self.revision += 1;
        debug!(revision = self.revision, ?event, "medication event applied");

        Ok(Some(event))
    }

    /// Validate a command and turn it into the event it would produce.
    fn plan(&self, command: MedicationCommand) -> RegistryResult<Option<MedicationEvent>> {
        match command {
            MedicationCommand::StartCri {
                name,
                rate,
                unit,
                administered_by,
                at,
            } => {
                validate_name(&name)?;
                validate_amount("rate", rate)?;
                Ok(Some(MedicationEvent::CriStarted {
                    cri: Cri::new(name, rate, unit, administered_by, to_millis(at)),
                }))
            }
            MedicationCommand::ChangeCriRate { cri_id, rate, at } => {
                let at = to_millis(at);
                let cri = self.cri_or_not_found(&cri_id)?;
                if !cri.is_active() {
                    return Err(RegistryError::AlreadyStopped(cri_id));
                }
                validate_amount("rate", rate)?;
                if at < cri.start_time {
                    return Err(RegistryError::Validation(format!(
                        "rate change at {} precedes infusion start {}",
                        at, cri.start_time
                    )));
                }
                Ok(Some(MedicationEvent::CriRateChanged {
                    cri_id,
                    change: RateChange {
                        timestamp: at,
                        rate,
                    },
                }))
            }
            MedicationCommand::StopCri { cri_id, at } => {
                let at = to_millis(at);
                let cri = self.cri_or_not_found(&cri_id)?;
                if let Some(end) = cri.end_time {
                    if end <= at {
                        return Ok(None);
                    }
                }
                if at < cri.last_change_at() {
                    return Err(RegistryError::Validation(format!(
                        "stop at {} precedes the last rate change at {}",
                        at,
                        cri.last_change_at()
                    )));
                }
                Ok(Some(MedicationEvent::CriStopped { cri_id, at }))
            }
            MedicationCommand::RecordBolus {
                name,
                dose,
                unit,
                administered_by,
                at,
            } => {
                validate_name(&name)?;
                validate_amount("dose", dose)?;
                Ok(Some(MedicationEvent::BolusRecorded {
                    bolus: Bolus::new(name, dose, unit, administered_by, to_millis(at)),
                }))
            }
            MedicationCommand::DeleteBolus { bolus_id } => {
                if !self.boluses.iter().any(|b| b.id == bolus_id) {
                    return Err(RegistryError::NotFound(bolus_id));
                }
                Ok(Some(MedicationEvent::BolusDeleted { bolus_id }))
            }
        }
    }

    /// Apply a validated event to the state.
    fn commit(&mut self, event: &MedicationEvent) {
        match event {
            MedicationEvent::CriStarted { cri } => self.cris.push(cri.clone()),
            MedicationEvent::CriRateChanged { cri_id, change } => {
                if let Some(cri) = self.cris.iter_mut().find(|c| &c.id == cri_id) {
                    cri.insert_rate_change(*change);
                }
            }
            MedicationEvent::CriStopped { cri_id, at } => {
                if let Some(cri) = self.cris.iter_mut().find(|c| &c.id == cri_id) {
                    cri.end_time = Some(*at);
                }
            }
            MedicationEvent::BolusRecorded { bolus } => self.boluses.push(bolus.clone()),
            MedicationEvent::BolusDeleted { bolus_id } => {
                self.boluses.retain(|b| &b.id != bolus_id);
            }
        }
    }

    fn cri_or_not_found(&self, cri_id: &str) -> RegistryResult<&Cri> {
        self.get_cri(cri_id)
            .ok_or_else(|| RegistryError::NotFound(cri_id.to_string()))
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Start an infusion at `now`.
    pub fn start_cri(
        &mut self,
        drug: &str,
        rate: f64,
        unit: &str,
        administered_by: &str,
        now: DateTime<Utc>,
    ) -> RegistryResult<Cri> {
        let event = self.apply(MedicationCommand::StartCri {
            name: drug.to_string(),
            rate,
            unit: unit.to_string(),
            administered_by: administered_by.to_string(),
            at: now,
        })?;
        match event {
            Some(MedicationEvent::CriStarted { cri }) => Ok(cri),
            _ => Err(RegistryError::Validation("infusion was not started".into())),
        }
    }

    /// Record a new rate for a running infusion.
    pub fn record_rate_change(
        &mut self,
        cri_id: &str,
        new_rate: f64,
        now: DateTime<Utc>,
    ) -> RegistryResult<()> {
        self.apply(MedicationCommand::ChangeCriRate {
            cri_id: cri_id.to_string(),
            rate: new_rate,
            at: now,
        })?;
        Ok(())
    }

    /// Stop an infusion. Stopping again at the same or a later time is a no-op.
    pub fn stop_cri(&mut self, cri_id: &str, now: DateTime<Utc>) -> RegistryResult<()> {
        self.apply(MedicationCommand::StopCri {
            cri_id: cri_id.to_string(),
            at: now,
        })?;
        Ok(())
    }

    /// Record a bolus given at `now`.
    pub fn record_bolus(
        &mut self,
        drug: &str,
        dose: f64,
        unit: &str,
        administered_by: &str,
        now: DateTime<Utc>,
    ) -> RegistryResult<Bolus> {
        let event = self.apply(MedicationCommand::RecordBolus {
            name: drug.to_string(),
            dose,
            unit: unit.to_string(),
            administered_by: administered_by.to_string(),
            at: now,
        })?;
        match event {
            Some(MedicationEvent::BolusRecorded { bolus }) => Ok(bolus),
            _ => Err(RegistryError::Validation("bolus was not recorded".into())),
        }
    }

    /// Delete a bolus entered in error.
    pub fn delete_bolus(&mut self, bolus_id: &str) -> RegistryResult<()> {
        self.apply(MedicationCommand::DeleteBolus {
            bolus_id: bolus_id.to_string(),
        })?;
        Ok(())
    }

    /// Replace a local record ID with the ID the store assigned.
    pub fn rekey(&mut self, local_id: &str, stored_id: &str) -> bool {
        if let Some(cri) = self.cris.iter_mut().find(|c| c.id == local_id) {
            cri.id = stored_id.to_string();
            return true;
        }
        if let Some(bolus) = self.boluses.iter_mut().find(|b| b.id == local_id) {
            bolus.id = stored_id.to_string();
            return true;
        }
        false
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get_cri(&self, cri_id: &str) -> Option<&Cri> {
        self.cris.iter().find(|c| c.id == cri_id)
    }

    pub fn get_bolus(&self, bolus_id: &str) -> Option<&Bolus> {
        self.boluses.iter().find(|b| b.id == bolus_id)
    }

    /// Infusions that have not been stopped.
    pub fn list_active_cris(&self) -> Vec<&Cri> {
        self.cris.iter().filter(|c| c.is_active()).collect()
    }

    /// Every infusion, in insertion order.
    pub fn list_all(&self) -> &[Cri] {
        &self.cris
    }

    /// Every bolus, in insertion order.
    pub fn list_boluses(&self) -> &[Bolus] {
        &self.boluses
    }

    pub fn is_empty(&self) -> bool {
        self.cris.is_empty() && self.boluses.is_empty()
    }

    /// Number of accepted mutations since this registry was created.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Earliest and latest instants mentioned by any record.
    pub fn time_extent(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let cri_instants = self.cris.iter().flat_map(|c| {
            std::iter::once(c.start_time)
                .chain(c.end_time)
                .chain(c.rate_history.last().map(|r| r.timestamp))
        });
        let bolus_instants = self.boluses.iter().map(|b| b.timestamp);

        cri_instants
            .chain(bolus_instants)
            .fold(None, |extent, at| match extent {
                None => Some((at, at)),
                Some((lo, hi)) => Some((lo.min(at), hi.max(at))),
            })
    }
}

fn to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

fn validate_name(name: &str) -> RegistryResult<()> {
    if name.trim().is_empty() {
        return Err(RegistryError::Validation("drug name is empty".into()));
    }
    Ok(())
}

fn validate_amount(what: &str, value: f64) -> RegistryResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(RegistryError::Validation(format!(
            "{} must be a positive number, got {}",
            what, value
        )));
    }
    Ok(())
}
