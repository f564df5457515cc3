//! Store-backed session tests.

use anesthesia_core::config::TimelineConfig;
use anesthesia_core::db::Database;
use anesthesia_core::models::Cri;
use anesthesia_core::session::{LoadOutcome, PatientSession, SessionError};
use anesthesia_core::store::{MedicationStore, MemoryStore, PatientRecords, StoreError};
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

const PATIENT: &str = "patient-max";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("anesthesia.db");

    let cri_id = {
        let db = Database::open(&path).unwrap();
        let mut session = PatientSession::new(db, PATIENT, TimelineConfig::default(), t0());
        let cri = session
            .start_cri("Ketamine", 10.0, "mcg/kg/min", "Dr. Smith", t0())
            .unwrap();
        session
            .change_cri_rate(&cri.id, 15.0, t0() + Duration::minutes(30))
            .unwrap();
        session
            .stop_cri(&cri.id, t0() + Duration::minutes(45))
            .unwrap();
        session
            .record_bolus("Propofol", 40.0, "mg", "Dr. Smith", t0() + Duration::minutes(5))
            .unwrap();
        cri.id
    };

    let db = Database::open(&path).unwrap();
    let now = t0() + Duration::minutes(60);
    let mut session = PatientSession::new(db, PATIENT, TimelineConfig::default(), now);
    assert_eq!(session.load(now).unwrap(), LoadOutcome::Applied);

    let cri = session.registry().get_cri(&cri_id).unwrap();
    assert_eq!(cri.rate, 15.0);
    assert_eq!(cri.rate_history.len(), 2);
    assert_eq!(cri.end_time, Some(t0() + Duration::minutes(45)));
    assert_eq!(session.registry().list_boluses().len(), 1);

    let window = session.timeline().visible_window();
    assert_eq!(window.start, t0());
    assert_eq!(window.end, now);
}

#[test]
fn test_reload_keeps_bolus_entry_order() {
    let db = Database::open_in_memory().unwrap();
    let mut session = PatientSession::new(db, PATIENT, TimelineConfig::default(), t0());
    session
        .record_bolus("Propofol", 40.0, "mg", "Dr. Smith", t0() + Duration::minutes(5))
        .unwrap();
    // Charted late: given before the Propofol
    session
        .record_bolus("Midazolam", 1.5, "mg", "Dr. Smith", t0())
        .unwrap();

    let names = |session: &PatientSession<Database>| -> Vec<String> {
        session
            .registry()
            .list_boluses()
            .iter()
            .map(|b| b.name.clone())
            .collect()
    };
    assert_eq!(names(&session), vec!["Propofol", "Midazolam"]);

    session.load(t0()).unwrap();
    assert_eq!(names(&session), vec!["Propofol", "Midazolam"]);

    // Drawing order is still by time
    let now = t0() + Duration::minutes(10);
    let drawn: Vec<_> = session
        .timeline()
        .layout(now)
        .iter()
        .map(|bar| bar.record.name().to_string())
        .collect();
    assert_eq!(drawn, vec!["Midazolam", "Propofol"]);
}

#[test]
fn test_audit_chain_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("anesthesia.db");

    let head = {
        let db = Database::open(&path).unwrap();
        let mut session = PatientSession::new(db, PATIENT, TimelineConfig::default(), t0());
        let cri = session
            .start_cri("Fentanyl", 5.0, "mcg/kg/hr", "Dr. Smith", t0())
            .unwrap();
        session
            .change_cri_rate(&cri.id, 7.5, t0() + Duration::minutes(20))
            .unwrap();
        session.registry().audit_log().head().to_string()
    };

    let db = Database::open(&path).unwrap();
    let mut session = PatientSession::new(db, PATIENT, TimelineConfig::default(), t0());
    session.load(t0()).unwrap();

    let log = session.registry().audit_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log.head(), head);
    assert!(log.verify());

    let cri_id = session.registry().list_all()[0].id.clone();
    session
        .stop_cri(&cri_id, t0() + Duration::minutes(40))
        .unwrap();
    assert_eq!(session.store().list_audit_entries(PATIENT).unwrap().len(), 3);
    assert_eq!(session.pending_audit_entries(), 0);
}

#[test]
fn test_sub_millisecond_instants_read_back_unchanged() {
    let db = Database::open_in_memory().unwrap();
    let mut session = PatientSession::new(db, PATIENT, TimelineConfig::default(), t0());
    let precise = t0() + Duration::nanoseconds(42_987_654_321);

    let cri = session
        .start_cri("Ketamine", 10.0, "mcg/kg/min", "Dr. Smith", precise)
        .unwrap();
    let bolus = session
        .record_bolus("Propofol", 40.0, "mg", "Dr. Smith", precise)
        .unwrap();
    let committed_cri = session.registry().get_cri(&cri.id).unwrap().clone();

    session.load(precise).unwrap();
    assert_eq!(session.registry().get_cri(&cri.id), Some(&committed_cri));
    assert_eq!(session.registry().get_bolus(&bolus.id), Some(&bolus));
}

#[test]
fn test_patients_are_isolated() {
    let db = Database::open_in_memory().unwrap();
    let mut session = PatientSession::new(db, PATIENT, TimelineConfig::default(), t0());
    session
        .record_bolus("Propofol", 40.0, "mg", "Dr. Smith", t0())
        .unwrap();

    assert_eq!(
        session.switch_patient("patient-bella", t0()).unwrap(),
        LoadOutcome::Applied
    );
    assert!(session.registry().is_empty());
    assert!(session.timeline().layout(t0()).is_empty());

    session.switch_patient(PATIENT, t0()).unwrap();
    assert_eq!(session.registry().list_boluses().len(), 1);
}

#[test]
fn test_failed_create_is_not_recorded_locally() {
    let mut session =
        PatientSession::new(MemoryStore::new(), PATIENT, TimelineConfig::default(), t0());
    session
        .store()
        .fail_next(StoreError::Timeout("create bolus".into()));

    let err = session
        .record_bolus("Propofol", 40.0, "mg", "Dr. Smith", t0())
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(session.registry().list_boluses().is_empty());
    assert!(session.registry().audit_log().is_empty());

    // Retrying the same action succeeds
    session
        .record_bolus("Propofol", 40.0, "mg", "Dr. Smith", t0())
        .unwrap();
    assert_eq!(session.registry().list_boluses().len(), 1);
}

#[test]
fn test_user_messages() {
    let mut session =
        PatientSession::new(MemoryStore::new(), PATIENT, TimelineConfig::default(), t0());

    let not_found = session.stop_cri("missing", t0()).unwrap_err();
    assert!(matches!(not_found, SessionError::Registry(_)));
    assert!(!not_found.is_retryable());
    assert!(not_found.user_message().contains("missing"));

    session
        .store()
        .fail_next(StoreError::Unavailable("offline".into()));
    let offline = session
        .start_cri("Ketamine", 10.0, "mcg/kg/min", "Dr. Smith", t0())
        .unwrap_err();
    assert!(offline.user_message().contains("Please retry"));
}

#[test]
fn test_async_style_load_with_stale_response() {
    let mut store = MemoryStore::new();
    store
        .create_cri(
            PATIENT,
            &Cri::new(
                "Dexmedetomidine".into(),
                1.0,
                "mcg/kg/hr".into(),
                "Dr. Smith".into(),
                t0(),
            ),
        )
        .unwrap();
    let mut session = PatientSession::new(store, PATIENT, TimelineConfig::default(), t0());

    // First request goes out, then the user refreshes before it returns
    let first = session.begin_load();
    let second = session.begin_load();
    let second_result = session.fetch(&second);

    assert_eq!(
        session.complete_load(second, second_result, t0()).unwrap(),
        LoadOutcome::Applied
    );
    // The slow first response arrives with an empty list and is ignored
    assert_eq!(
        session
            .complete_load(first, Ok(PatientRecords::default()), t0())
            .unwrap(),
        LoadOutcome::Superseded
    );
    assert_eq!(session.registry().list_active_cris().len(), 1);
}

#[test]
fn test_store_assigned_ids() {
    let mut session = PatientSession::new(
        MemoryStore::with_assigned_ids("rec"),
        PATIENT,
        TimelineConfig::default(),
        t0(),
    );
    let bolus = session
        .record_bolus("Propofol", 40.0, "mg", "Dr. Smith", t0())
        .unwrap();
    assert_eq!(bolus.id, "rec-1");

    session.delete_bolus("rec-1", t0()).unwrap();
    assert!(session.registry().list_boluses().is_empty());
    assert!(session.store().records(PATIENT).unwrap().boluses.is_empty());
}
