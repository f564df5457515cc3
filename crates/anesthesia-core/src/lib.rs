//! Anesthesia Core Library
//!
//! Medication timeline and dosage calculation engine for veterinary
//! anesthesia records.
//!
//! # Architecture
//!
//! ```text
//!   dosage range ─┐
//!   weight ───────┼─► Dosage Calculator ─► anticipated dose ─► volume
//!   concentration ┘        (pure)
//!
//!   clinician action ─► PatientSession ─► stage on registry copy
//!                                               │
//!                                      MedicationStore (SQLite / memory)
//!                                               │ ok
//!                                      commit + audit chain entry
//!                                               │
//!                       TimeWindowController ◄──┴──► TimelineProjector
//!                        (zoom / pan / seek)          (percent layout)
//!                                   └──── MedicationTimeline::layout ────► UI
//! ```
//!
//! # Core Principle
//!
//! **Local state only advances after the store accepts the write.** A failed
//! save leaves the timeline exactly as it was.
//!
//! # Modules
//!
//! - [`dosage`]: Dose, volume and fluid-rate calculator plus derived-field table
//! - [`models`]: Domain types (Cri, Bolus, DosageItem, etc.)
//! - [`registry`]: Per-patient CRI/bolus registry with a single mutation entry point
//! - [`timeline`]: Visible window controller, projector and view-model
//! - [`store`]: Persistence boundary and in-memory store
//! - [`session`]: Store-backed patient session
//! - [`db`]: SQLite store
//! - [`audit`]: Hash-chained log of accepted medication events
//! - [`config`]: Timeline navigation settings

pub mod audit;
pub mod config;
pub mod db;
pub mod dosage;
pub mod models;
pub mod registry;
pub mod session;
pub mod store;
pub mod timeline;

// Re-export commonly used types
pub use audit::{AuditEntry, AuditLog};
pub use config::TimelineConfig;
pub use db::Database;
pub use models::{
    Bolus, Cri, DosageCategory, DosageItem, DosageSheet, FluidRate, RateChange, RateSegment,
};
pub use registry::{MedicationCommand, MedicationEvent, MedicationRegistry, RegistryError};
pub use session::{LoadOutcome, LoadTicket, PatientSession, SessionError};
pub use store::{MedicationStore, MemoryStore, PatientRecords, StoreError};
pub use timeline::{
    MedicationTimeline, RateMark, SegmentBar, TimeWindow, TimeWindowController, TimelineBar,
    TimelineProjector, TimelineRecord,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum TimelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already stopped: {0}")]
    AlreadyStopped(String),

    /// Transient; the host should offer a retry
    #[error("{0}")]
    Retryable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<db::DbError> for TimelineError {
    fn from(e: db::DbError) -> Self {
        TimelineError::DatabaseError(e.to_string())
    }
}

impl From<config::ConfigError> for TimelineError {
    fn from(e: config::ConfigError) -> Self {
        TimelineError::InvalidInput(e.to_string())
    }
}

impl From<SessionError> for TimelineError {
    fn from(e: SessionError) -> Self {
        match &e {
            SessionError::Registry(RegistryError::Validation(_)) => {
                TimelineError::InvalidInput(e.user_message())
            }
            SessionError::Registry(RegistryError::NotFound(_))
            | SessionError::Store(StoreError::NotFound(_)) => {
                TimelineError::NotFound(e.user_message())
            }
            SessionError::Registry(RegistryError::AlreadyStopped(_)) => {
                TimelineError::AlreadyStopped(e.user_message())
            }
            _ if e.is_retryable() => TimelineError::Retryable(e.user_message()),
            _ => TimelineError::DatabaseError(e.to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for TimelineError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        TimelineError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, TimelineError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| TimelineError::InvalidInput(format!("timestamp out of range: {}", ms)))
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path and load a patient's
/// medications.
#[uniffi::export]
pub fn open_timeline(
    path: String,
    patient_id: String,
    now_ms: i64,
) -> Result<Arc<AnesthesiaTimeline>, TimelineError> {
    let db = Database::open(&path)?;
    AnesthesiaTimeline::create(db, &patient_id, TimelineConfig::default(), now_ms)
}

/// Same as [`open_timeline`], with navigation settings given as JSON.
#[uniffi::export]
pub fn open_timeline_with_config(
    path: String,
    patient_id: String,
    config_json: String,
    now_ms: i64,
) -> Result<Arc<AnesthesiaTimeline>, TimelineError> {
    let config = TimelineConfig::from_json(&config_json)?;
    let db = Database::open(&path)?;
    AnesthesiaTimeline::create(db, &patient_id, config, now_ms)
}

/// Timeline over an in-memory database (for testing and previews).
#[uniffi::export]
pub fn open_timeline_in_memory(
    patient_id: String,
    now_ms: i64,
) -> Result<Arc<AnesthesiaTimeline>, TimelineError> {
    let db = Database::open_in_memory()?;
    AnesthesiaTimeline::create(db, &patient_id, TimelineConfig::default(), now_ms)
}

/// Anticipated dose for a dosage range and weight; empty when indeterminate.
#[uniffi::export]
pub fn compute_anticipated_dose(dosage_range: String, weight_kg: f64) -> String {
    dosage::compute_anticipated_dose(&dosage_range, weight_kg)
}

/// Volume for a dose and concentration; empty when indeterminate.
#[uniffi::export]
pub fn compute_volume(dose: String, concentration: String) -> String {
    dosage::compute_volume(&dose, &concentration)
}

/// Hourly fluid rate for a per-kg rate and weight; empty when indeterminate.
#[uniffi::export]
pub fn compute_hourly_rate(rate_per_kg_per_hour: String, weight_kg: f64) -> String {
    dosage::compute_hourly_rate(&rate_per_kg_per_hour, weight_kg)
}

// =========================================================================
// Timeline Object
// =========================================================================

/// Thread-safe patient session for FFI.
#[derive(uniffi::Object)]
pub struct AnesthesiaTimeline {
    session: Mutex<PatientSession<Database>>,
}

impl AnesthesiaTimeline {
    fn create(
        db: Database,
        patient_id: &str,
        config: TimelineConfig,
        now_ms: i64,
    ) -> Result<Arc<Self>, TimelineError> {
        let now = from_millis(now_ms)?;
        let mut session = PatientSession::new(db, patient_id, config, now);
        session.load(now)?;
        Ok(Arc::new(Self {
            session: Mutex::new(session),
        }))
    }
}

#[uniffi::export]
impl AnesthesiaTimeline {
    // =========================================================================
    // Loading
    // =========================================================================

    /// Reload the current patient's records.
    pub fn reload(&self, now_ms: i64) -> Result<(), TimelineError> {
        let now = from_millis(now_ms)?;
        let mut session = self.session.lock()?;
        session.load(now)?;
        Ok(())
    }

    /// Show another patient's records.
    pub fn switch_patient(&self, patient_id: String, now_ms: i64) -> Result<(), TimelineError> {
        let now = from_millis(now_ms)?;
        let mut session = self.session.lock()?;
        session.switch_patient(&patient_id, now)?;
        Ok(())
    }

    pub fn patient_id(&self) -> Result<String, TimelineError> {
        let session = self.session.lock()?;
        Ok(session.patient_id().to_string())
    }

    // =========================================================================
    // Medication Operations
    // =========================================================================

    /// Start a CRI now.
    pub fn start_cri(
        &self,
        drug: String,
        rate: f64,
        unit: String,
        administered_by: String,
        now_ms: i64,
    ) -> Result<FfiCri, TimelineError> {
        let now = from_millis(now_ms)?;
        let mut session = self.session.lock()?;
        let cri = session.start_cri(&drug, rate, &unit, &administered_by, now)?;
        Ok(cri.into())
    }

    /// Change a running CRI's rate.
    pub fn change_cri_rate(
        &self,
        cri_id: String,
        new_rate: f64,
        now_ms: i64,
    ) -> Result<(), TimelineError> {
        let now = from_millis(now_ms)?;
        let mut session = self.session.lock()?;
        session.change_cri_rate(&cri_id, new_rate, now)?;
        Ok(())
    }

    /// Stop a CRI. Stopping twice is harmless.
    pub fn stop_cri(&self, cri_id: String, now_ms: i64) -> Result<(), TimelineError> {
        let now = from_millis(now_ms)?;
        let mut session = self.session.lock()?;
        session.stop_cri(&cri_id, now)?;
        Ok(())
    }

    /// Record a bolus given now.
    pub fn record_bolus(
        &self,
        drug: String,
        dose: f64,
        unit: String,
        administered_by: String,
        now_ms: i64,
    ) -> Result<FfiBolus, TimelineError> {
        let now = from_millis(now_ms)?;
        let mut session = self.session.lock()?;
        let bolus = session.record_bolus(&drug, dose, &unit, &administered_by, now)?;
        Ok(bolus.into())
    }

    /// Delete a bolus entered in error.
    pub fn delete_bolus(&self, bolus_id: String, now_ms: i64) -> Result<(), TimelineError> {
        let now = from_millis(now_ms)?;
        let mut session = self.session.lock()?;
        session.delete_bolus(&bolus_id, now)?;
        Ok(())
    }

    /// CRIs that are still running.
    pub fn active_cris(&self) -> Result<Vec<FfiCri>, TimelineError> {
        let session = self.session.lock()?;
        Ok(session
            .registry()
            .list_active_cris()
            .into_iter()
            .cloned()
            .map(FfiCri::from)
            .collect())
    }

    /// Every CRI, running or stopped.
    pub fn all_cris(&self) -> Result<Vec<FfiCri>, TimelineError> {
        let session = self.session.lock()?;
        Ok(session
            .registry()
            .list_all()
            .iter()
            .cloned()
            .map(FfiCri::from)
            .collect())
    }

    /// Rate an infusion was running at, or `None` outside its run.
    pub fn cri_rate_at(&self, cri_id: String, at_ms: i64) -> Result<Option<f64>, TimelineError> {
        let at = from_millis(at_ms)?;
        let session = self.session.lock()?;
        let cri = session
            .registry()
            .get_cri(&cri_id)
            .ok_or_else(|| TimelineError::NotFound(format!("infusion {}", cri_id)))?;
        Ok(cri.rate_at(at))
    }

    pub fn boluses(&self) -> Result<Vec<FfiBolus>, TimelineError> {
        let session = self.session.lock()?;
        Ok(session
            .registry()
            .list_boluses()
            .iter()
            .cloned()
            .map(FfiBolus::from)
            .collect())
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    pub fn zoom_in(&self) -> Result<FfiWindow, TimelineError> {
        self.navigate(TimeWindowController::zoom_in)
    }

    pub fn zoom_out(&self) -> Result<FfiWindow, TimelineError> {
        self.navigate(TimeWindowController::zoom_out)
    }

    pub fn pan_left(&self) -> Result<FfiWindow, TimelineError> {
        self.navigate(TimeWindowController::pan_left)
    }

    pub fn pan_right(&self) -> Result<FfiWindow, TimelineError> {
        self.navigate(TimeWindowController::pan_right)
    }

    pub fn reset_zoom(&self) -> Result<FfiWindow, TimelineError> {
        self.navigate(TimeWindowController::reset_zoom)
    }

    /// Move the window to a slider position in `[0, 100]`.
    pub fn seek(&self, position: f64) -> Result<FfiWindow, TimelineError> {
        self.navigate(|controller| controller.seek(position))
    }

    /// Extend the data range to `now` (call on a clock tick).
    pub fn refresh(&self, now_ms: i64) -> Result<FfiWindow, TimelineError> {
        let now = from_millis(now_ms)?;
        let mut session = self.session.lock()?;
        session.timeline_mut().refresh_range(now);
        Ok(FfiWindow::from(session.timeline().controller()))
    }

    pub fn visible_window(&self) -> Result<FfiWindow, TimelineError> {
        let session = self.session.lock()?;
        Ok(FfiWindow::from(session.timeline().controller()))
    }

    /// Bars and markers to draw, ordered by start time.
    pub fn layout(&self, now_ms: i64) -> Result<Vec<FfiTimelineBar>, TimelineError> {
        let now = from_millis(now_ms)?;
        let session = self.session.lock()?;
        Ok(session
            .timeline()
            .layout(now)
            .into_iter()
            .map(FfiTimelineBar::from)
            .collect())
    }

    // =========================================================================
    // Audit
    // =========================================================================

    /// Hash of the latest audit entry for this patient.
    pub fn audit_head(&self) -> Result<String, TimelineError> {
        let session = self.session.lock()?;
        Ok(session.registry().audit_log().head().to_string())
    }

    /// Whether the audit chain is intact.
    pub fn verify_audit_log(&self) -> Result<bool, TimelineError> {
        let session = self.session.lock()?;
        Ok(session.registry().audit_log().verify())
    }
}

impl AnesthesiaTimeline {
    fn navigate<F>(&self, action: F) -> Result<FfiWindow, TimelineError>
    where
        F: FnOnce(&mut TimeWindowController),
    {
        let mut session = self.session.lock()?;
        action(session.timeline_mut().controller_mut());
        Ok(FfiWindow::from(session.timeline().controller()))
    }
}

// =========================================================================
// Dosage Plan Object
// =========================================================================

/// Anesthesia plan drug table with derived dose and volume fields.
#[derive(uniffi::Object)]
pub struct DosagePlan {
    sheet: Mutex<DosageSheet>,
}

#[uniffi::export]
impl DosagePlan {
    #[uniffi::constructor]
    pub fn new(weight_kg: Option<f64>) -> Arc<Self> {
        Arc::new(Self {
            sheet: Mutex::new(DosageSheet::new(weight_kg)),
        })
    }

    /// Change the patient weight; dependent fields are recomputed.
    pub fn set_weight(&self, weight_kg: Option<f64>) -> Result<Vec<FfiDosageItem>, TimelineError> {
        let mut sheet = self.sheet.lock()?;
        sheet.set_weight(weight_kg);
        Ok(sheet.items.iter().cloned().map(FfiDosageItem::from).collect())
    }

    /// Add a drug row and return its index.
    pub fn add_item(
        &self,
        category: FfiDosageCategory,
        name: String,
    ) -> Result<u32, TimelineError> {
        let mut sheet = self.sheet.lock()?;
        let index = sheet.add_item(DosageItem::new(category.into(), name));
        Ok(index as u32)
    }

    /// Edit one field of a row and return the row as recomputed.
    pub fn edit_item(
        &self,
        index: u32,
        field: FfiDosageField,
        value: String,
    ) -> Result<FfiDosageItem, TimelineError> {
        let mut sheet = self.sheet.lock()?;
        sheet
            .edit_item(index as usize, field.into(), value)
            .cloned()
            .map(FfiDosageItem::from)
            .ok_or_else(|| TimelineError::NotFound(format!("dosage row {}", index)))
    }

    pub fn remove_item(&self, index: u32) -> Result<(), TimelineError> {
        let mut sheet = self.sheet.lock()?;
        sheet
            .remove_item(index as usize)
            .map(|_| ())
            .ok_or_else(|| TimelineError::NotFound(format!("dosage row {}", index)))
    }

    pub fn items(&self) -> Result<Vec<FfiDosageItem>, TimelineError> {
        let sheet = self.sheet.lock()?;
        Ok(sheet.items.iter().cloned().map(FfiDosageItem::from).collect())
    }

    /// Rows in one plan section, in entry order.
    pub fn items_in(&self, category: FfiDosageCategory) -> Result<Vec<FfiDosageItem>, TimelineError> {
        let sheet = self.sheet.lock()?;
        Ok(sheet
            .items_in(category.into())
            .cloned()
            .map(FfiDosageItem::from)
            .collect())
    }

    /// Set the mL/kg/hr fluid rate and return the mL/hr rate.
    pub fn set_fluid_rate(&self, rate_per_kg_per_hour: String) -> Result<String, TimelineError> {
        let mut sheet = self.sheet.lock()?;
        sheet.set_fluid_rate(rate_per_kg_per_hour);
        Ok(sheet.fluid.hourly_rate.clone())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe rate history entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRateChange {
    pub timestamp_ms: i64,
    pub rate: f64,
}

impl From<RateChange> for FfiRateChange {
    fn from(change: RateChange) -> Self {
        Self {
            timestamp_ms: change.timestamp.timestamp_millis(),
            rate: change.rate,
        }
    }
}

/// FFI-safe CRI.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCri {
    pub id: String,
    pub name: String,
    pub rate: f64,
    pub unit: String,
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    pub rate_history: Vec<FfiRateChange>,
    pub administered_by: String,
}

impl From<Cri> for FfiCri {
    fn from(cri: Cri) -> Self {
        Self {
            id: cri.id,
            name: cri.name,
            rate: cri.rate,
            unit: cri.unit,
            start_time_ms: cri.start_time.timestamp_millis(),
            end_time_ms: cri.end_time.map(|t| t.timestamp_millis()),
            rate_history: cri.rate_history.into_iter().map(FfiRateChange::from).collect(),
            administered_by: cri.administered_by,
        }
    }
}

/// FFI-safe bolus.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBolus {
    pub id: String,
    pub name: String,
    pub dose: f64,
    pub unit: String,
    pub timestamp_ms: i64,
    pub administered_by: String,
}

impl From<Bolus> for FfiBolus {
    fn from(bolus: Bolus) -> Self {
        Self {
            id: bolus.id,
            name: bolus.name,
            dose: bolus.dose,
            unit: bolus.unit,
            timestamp_ms: bolus.timestamp.timestamp_millis(),
            administered_by: bolus.administered_by,
        }
    }
}

/// FFI-safe window state.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiWindow {
    pub start_ms: i64,
    pub end_ms: i64,
    pub data_start_ms: i64,
    pub data_end_ms: i64,
    pub zoom_percent: u32,
    /// Slider position in `[0, 100]`
    pub position: f64,
}

impl From<&TimeWindowController> for FfiWindow {
    fn from(controller: &TimeWindowController) -> Self {
        let visible = controller.visible_window();
        let data = controller.data_range();
        Self {
            start_ms: visible.start.timestamp_millis(),
            end_ms: visible.end.timestamp_millis(),
            data_start_ms: data.start.timestamp_millis(),
            data_end_ms: data.end.timestamp_millis(),
            zoom_percent: controller.zoom_percent(),
            position: controller.position(),
        }
    }
}

/// FFI-safe rate mark.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRateMark {
    pub left_percent: f64,
    pub rate: f64,
}

/// FFI-safe constant-rate stretch of an infusion bar.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSegmentBar {
    pub rate: f64,
    pub left_percent: f64,
    pub width_percent: f64,
}

/// FFI-safe timeline bar. Exactly one of `cri` and `bolus` is set.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTimelineBar {
    pub cri: Option<FfiCri>,
    pub bolus: Option<FfiBolus>,
    pub left_percent: f64,
    pub width_percent: Option<f64>,
    pub rate_marks: Vec<FfiRateMark>,
    pub segments: Vec<FfiSegmentBar>,
}

impl From<TimelineBar> for FfiTimelineBar {
    fn from(bar: TimelineBar) -> Self {
        let (cri, bolus) = match bar.record {
            TimelineRecord::Infusion(cri) => (Some(cri.into()), None),
            TimelineRecord::Bolus(bolus) => (None, Some(bolus.into())),
        };
        Self {
            cri,
            bolus,
            left_percent: bar.left_percent,
            width_percent: bar.width_percent,
            rate_marks: bar
                .rate_marks
                .into_iter()
                .map(|mark| FfiRateMark {
                    left_percent: mark.left_percent,
                    rate: mark.rate,
                })
                .collect(),
            segments: bar
                .segments
                .into_iter()
                .map(|segment| FfiSegmentBar {
                    rate: segment.rate,
                    left_percent: segment.left_percent,
                    width_percent: segment.width_percent,
                })
                .collect(),
        }
    }
}

/// FFI-safe plan section.
#[derive(Debug, Clone, Copy, uniffi::Enum)]
pub enum FfiDosageCategory {
    Premedication,
    Induction,
    ConstantRateInfusion,
    OtherTechnique,
    LocalRegional,
}

impl From<FfiDosageCategory> for DosageCategory {
    fn from(category: FfiDosageCategory) -> Self {
        match category {
            FfiDosageCategory::Premedication => DosageCategory::Premedication,
            FfiDosageCategory::Induction => DosageCategory::Induction,
            FfiDosageCategory::ConstantRateInfusion => DosageCategory::ConstantRateInfusion,
            FfiDosageCategory::OtherTechnique => DosageCategory::OtherTechnique,
            FfiDosageCategory::LocalRegional => DosageCategory::LocalRegional,
        }
    }
}

impl From<DosageCategory> for FfiDosageCategory {
    fn from(category: DosageCategory) -> Self {
        match category {
            DosageCategory::Premedication => FfiDosageCategory::Premedication,
            DosageCategory::Induction => FfiDosageCategory::Induction,
            DosageCategory::ConstantRateInfusion => FfiDosageCategory::ConstantRateInfusion,
            DosageCategory::OtherTechnique => FfiDosageCategory::OtherTechnique,
            DosageCategory::LocalRegional => FfiDosageCategory::LocalRegional,
        }
    }
}

/// FFI-safe dosage field.
#[derive(Debug, Clone, Copy, uniffi::Enum)]
pub enum FfiDosageField {
    Name,
    Route,
    DosageRange,
    AnticipatedDose,
    Concentration,
    Volume,
}

impl From<FfiDosageField> for dosage::DosageField {
    fn from(field: FfiDosageField) -> Self {
        match field {
            FfiDosageField::Name => dosage::DosageField::Name,
            FfiDosageField::Route => dosage::DosageField::Route,
            FfiDosageField::DosageRange => dosage::DosageField::DosageRange,
            FfiDosageField::AnticipatedDose => dosage::DosageField::AnticipatedDose,
            FfiDosageField::Concentration => dosage::DosageField::Concentration,
            FfiDosageField::Volume => dosage::DosageField::Volume,
        }
    }
}

/// FFI-safe dosage row.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDosageItem {
    pub category: FfiDosageCategory,
    pub name: String,
    pub route: Option<String>,
    pub dosage_range: String,
    pub anticipated_dose: String,
    pub concentration: String,
    pub volume: String,
    pub dose_overridden: bool,
    pub volume_overridden: bool,
}

impl From<DosageItem> for FfiDosageItem {
    fn from(item: DosageItem) -> Self {
        let dose_overridden = item.is_overridden(dosage::DosageField::AnticipatedDose);
        let volume_overridden = item.is_overridden(dosage::DosageField::Volume);
        Self {
            category: item.category.into(),
            name: item.name,
            route: item.route,
            dosage_range: item.dosage_range,
            anticipated_dose: item.anticipated_dose,
            concentration: item.concentration,
            volume: item.volume,
            dose_overridden,
            volume_overridden,
        }
    }
}
