//! One patient's medication timeline backed by a store.
//!
//! Mutations run as stage, persist, commit: the command is applied to a
//! copy of the registry, the resulting event is written to the store, and
//! only then does the copy replace the live registry. A failed write leaves
//! the timeline exactly as it was. The new audit entry is appended to the
//! store after the commit; entries that fail to write are retried on the
//! next mutation or load.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::config::TimelineConfig;
use crate::models::{Bolus, Cri};
use crate::registry::{MedicationCommand, MedicationEvent, MedicationRegistry, RegistryError};
use crate::store::{MedicationStore, PatientRecords, StoreError, StoreResult};
use crate::timeline::MedicationTimeline;

/// Session errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Whether the user should be offered a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Registry(_) => false,
            SessionError::Store(e) => e.is_transient(),
        }
    }

    /// Message suitable for showing to the clinician.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Registry(e) => e.to_string(),
            SessionError::Store(StoreError::NotFound(what)) => {
                format!("Record not found: {}", what)
            }
            SessionError::Store(_) => {
                "Could not reach the medication record. Please retry.".to_string()
            }
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Identifies one load request. Only the most recent ticket for the
/// current patient may apply its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub patient_id: String,
    pub sequence: u64,
}

/// What happened to a completed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// A newer load was issued, or the patient changed; the result was dropped
    Superseded,
}

/// The medication timeline for one patient.
pub struct PatientSession<S: MedicationStore> {
    patient_id: String,
    store: S,
    timeline: MedicationTimeline,
    config: TimelineConfig,
    load_sequence: u64,
    /// Leading audit entries the store already holds
    audit_synced: usize,
}

impl<S: MedicationStore> PatientSession<S> {
    /// Create a session with an empty timeline. Call [`Self::load`] to fetch
    /// stored records.
    pub fn new(store: S, patient_id: &str, config: TimelineConfig, now: DateTime<Utc>) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            store,
            timeline: MedicationTimeline::new(MedicationRegistry::new(), config.clone(), now),
            config,
            load_sequence: 0,
            audit_synced: 0,
        }
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn timeline(&self) -> &MedicationTimeline {
        &self.timeline
    }

    /// Zoom and pan state is transient and not persisted.
    pub fn timeline_mut(&mut self) -> &mut MedicationTimeline {
        &mut self.timeline
    }

    pub fn registry(&self) -> &MedicationRegistry {
        self.timeline.registry()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Audit entries committed locally but not yet written to the store.
    pub fn pending_audit_entries(&self) -> usize {
        self.registry().audit_log().len() - self.audit_synced
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Start a load. Any earlier ticket is superseded.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.flush_audit();
        self.load_sequence += 1;
        LoadTicket {
            patient_id: self.patient_id.clone(),
            sequence: self.load_sequence,
        }
    }

    /// Fetch the records a ticket asks for.
    pub fn fetch(&self, ticket: &LoadTicket) -> StoreResult<PatientRecords> {
        self.store.fetch_all(&ticket.patient_id)
    }

    /// Apply a fetched result if its ticket is still current.
    ///
    /// A ticket issued before the latest committed mutation is stale too:
    /// its snapshot may not contain that mutation. A failed fetch for a
    /// current ticket leaves the last-known records in place and returns the
    /// error.
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: StoreResult<PatientRecords>,
        now: DateTime<Utc>,
    ) -> SessionResult<LoadOutcome> {
        if ticket.sequence != self.load_sequence || ticket.patient_id != self.patient_id {
            debug!(
                patient_id = %ticket.patient_id,
                sequence = ticket.sequence,
                latest = self.load_sequence,
                "dropping superseded load"
            );
            return Ok(LoadOutcome::Superseded);
        }

        let records = result.map_err(|e| {
            warn!(patient_id = %self.patient_id, error = %e, "failed to load medications");
            e
        })?;
        // Keep local entries the store has not received yet
        let local = self.timeline.registry().audit_log();
        let audit = if self.audit_synced < local.len() && records.audit.len() == self.audit_synced {
            local.clone()
        } else {
            self.audit_synced = records.audit.len();
            AuditLog::from_entries(records.audit)
        };
        if !audit.verify() {
            warn!(patient_id = %self.patient_id, entries = audit.len(), "stored audit chain does not verify");
        }

        let registry =
            MedicationRegistry::from_records(records.cris, records.boluses)?.with_audit_log(audit);
        info!(
            patient_id = %self.patient_id,
            cris = registry.list_all().len(),
            boluses = registry.list_boluses().len(),
            audit_entries = registry.audit_log().len(),
            "loaded medications"
        );
        self.timeline.replace_registry(registry, now);
        Ok(LoadOutcome::Applied)
    }

    /// Fetch and apply in one step.
    pub fn load(&mut self, now: DateTime<Utc>) -> SessionResult<LoadOutcome> {
        let ticket = self.begin_load();
        let result = self.fetch(&ticket);
        self.complete_load(ticket, result, now)
    }

    /// Switch to another patient. The previous patient's records are cleared
    /// right away so they are never shown against the new patient.
    pub fn switch_patient(
        &mut self,
        patient_id: &str,
        now: DateTime<Utc>,
    ) -> SessionResult<LoadOutcome> {
        self.flush_audit();
        self.patient_id = patient_id.to_string();
        self.timeline = MedicationTimeline::new(MedicationRegistry::new(), self.config.clone(), now);
        self.audit_synced = 0;
        self.load(now)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Start an infusion and persist it.
    pub fn start_cri(
        &mut self,
        drug: &str,
        rate: f64,
        unit: &str,
        administered_by: &str,
        now: DateTime<Utc>,
    ) -> SessionResult<Cri> {
        let event = self.execute(
            MedicationCommand::StartCri {
                name: drug.to_string(),
                rate,
                unit: unit.to_string(),
                administered_by: administered_by.to_string(),
                at: now,
            },
            now,
        )?;
        match event {
            Some(MedicationEvent::CriStarted { cri }) => {
                Ok(self.registry().get_cri(&cri.id).cloned().unwrap_or(cri))
            }
            _ => Err(RegistryError::Validation("infusion was not started".into()).into()),
        }
    }

    /// Record a new rate for a running infusion and persist it.
    pub fn change_cri_rate(
        &mut self,
        cri_id: &str,
        new_rate: f64,
        now: DateTime<Utc>,
    ) -> SessionResult<()> {
        self.execute(
            MedicationCommand::ChangeCriRate {
                cri_id: cri_id.to_string(),
                rate: new_rate,
                at: now,
            },
            now,
        )?;
        Ok(())
    }

    /// Stop an infusion and persist it. A repeated stop writes nothing.
    pub fn stop_cri(&mut self, cri_id: &str, now: DateTime<Utc>) -> SessionResult<()> {
        self.execute(
            MedicationCommand::StopCri {
                cri_id: cri_id.to_string(),
                at: now,
            },
            now,
        )?;
        Ok(())
    }

    /// Record a bolus and persist it.
    pub fn record_bolus(
        &mut self,
        drug: &str,
        dose: f64,
        unit: &str,
        administered_by: &str,
        now: DateTime<Utc>,
    ) -> SessionResult<Bolus> {
        let event = self.execute(
            MedicationCommand::RecordBolus {
                name: drug.to_string(),
                dose,
                unit: unit.to_string(),
                administered_by: administered_by.to_string(),
                at: now,
            },
            now,
        )?;
        match event {
            Some(MedicationEvent::BolusRecorded { bolus }) => {
                Ok(self.registry().get_bolus(&bolus.id).cloned().unwrap_or(bolus))
            }
            _ => Err(RegistryError::Validation("bolus was not recorded".into()).into()),
        }
    }

    /// Delete a bolus entered in error, in the store and locally.
    pub fn delete_bolus(&mut self, bolus_id: &str, now: DateTime<Utc>) -> SessionResult<()> {
        self.execute(
            MedicationCommand::DeleteBolus {
                bolus_id: bolus_id.to_string(),
            },
            now,
        )?;
        Ok(())
    }

    /// Stage the command on a copy, persist the event, then commit.
    ///
    /// Returned events carry the stored ID when the store assigned a new one.
    fn execute(
        &mut self,
        command: MedicationCommand,
        now: DateTime<Utc>,
    ) -> SessionResult<Option<MedicationEvent>> {
        let mut staged = self.timeline.registry().clone();
        let event = match staged.apply(command)? {
            Some(event) => event,
            None => return Ok(None),
        };

        let stored_id = self.persist(&event).map_err(|e| {
            warn!(patient_id = %self.patient_id, error = %e, ?event, "failed to persist medication event");
            e
        })?;

        let event = match (event, stored_id) {
            (MedicationEvent::CriStarted { mut cri }, Some(stored)) if stored != cri.id => {
                staged.rekey(&cri.id, &stored);
                cri.id = stored;
                MedicationEvent::CriStarted { cri }
            }
            (MedicationEvent::BolusRecorded { mut bolus }, Some(stored)) if stored != bolus.id => {
                staged.rekey(&bolus.id, &stored);
                bolus.id = stored;
                MedicationEvent::BolusRecorded { bolus }
            }
            (event, _) => event,
        };

        info!(patient_id = %self.patient_id, ?event, "persisted medication event");
        self.timeline.replace_registry(staged, now);
        // Loads issued before this commit may not contain it
        self.load_sequence += 1;
        self.flush_audit();
        Ok(Some(event))
    }

    /// Write audit entries the store has not received, oldest first. Stops
    /// at the first failure and leaves the rest pending.
    fn flush_audit(&mut self) {
        let entries = self.timeline.registry().audit_log().entries();
        while let Some(entry) = entries.get(self.audit_synced) {
            if let Err(e) = self.store.append_audit(&self.patient_id, entry) {
                warn!(
                    patient_id = %self.patient_id,
                    sequence = entry.sequence,
                    error = %e,
                    "failed to write audit entry"
                );
                return;
            }
            self.audit_synced += 1;
        }
    }

    /// Write one event to the store. Returns the stored ID for creations.
    fn persist(&mut self, event: &MedicationEvent) -> StoreResult<Option<String>> {
        let patient_id = self.patient_id.as_str();
        match event {
            MedicationEvent::CriStarted { cri } => self.store.create_cri(patient_id, cri).map(Some),
            MedicationEvent::CriRateChanged { cri_id, change } => self
                .store
                .update_cri_rate(patient_id, cri_id, change.rate, change.timestamp)
                .map(|_| None),
            MedicationEvent::CriStopped { cri_id, at } => {
                self.store.stop_cri(patient_id, cri_id, *at).map(|_| None)
            }
            MedicationEvent::BolusRecorded { bolus } => {
                self.store.create_bolus(patient_id, bolus).map(Some)
            }
            MedicationEvent::BolusDeleted { bolus_id } => {
                self.store.delete_bolus(patient_id, bolus_id).map(|_| None)
            }
        }
    }
}
