//! End-to-end scenarios for the registry and the visible window.

use anesthesia_core::config::TimelineConfig;
use anesthesia_core::models::Bolus;
use anesthesia_core::registry::{MedicationRegistry, RegistryError};
use anesthesia_core::timeline::{
    MedicationTimeline, TimeWindowController, TimelineProjector, TimelineRecord,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

#[test]
fn test_cri_lifecycle() {
    let mut registry = MedicationRegistry::new();
    let cri = registry
        .start_cri("Fentanyl", 10.0, "mcg/kg/hr", "Dr. Smith", t0())
        .unwrap();
    registry
        .record_rate_change(&cri.id, 15.0, t0() + Duration::minutes(30))
        .unwrap();
    registry
        .stop_cri(&cri.id, t0() + Duration::minutes(45))
        .unwrap();

    let stopped = registry.get_cri(&cri.id).unwrap();
    assert_eq!(stopped.rate_history.len(), 2);
    assert_eq!(stopped.rate, 15.0);
    assert_eq!(stopped.end_time, Some(t0() + Duration::minutes(45)));
    assert!(registry.list_active_cris().is_empty());

    let err = registry
        .record_rate_change(&cri.id, 20.0, t0() + Duration::minutes(50))
        .unwrap_err();
    assert_eq!(err, RegistryError::AlreadyStopped(cri.id.clone()));
    assert_eq!(registry.get_cri(&cri.id).unwrap().rate_history.len(), 2);

    // Every accepted change is on the audit chain
    assert_eq!(registry.audit_log().len(), 3);
    assert!(registry.audit_log().verify());
}

#[test]
fn test_zoom_in_once_on_an_hour() {
    let mut controller =
        TimeWindowController::with_defaults(t0(), t0() + Duration::minutes(60));
    let midpoint = controller.visible_window().midpoint();

    controller.zoom_in();

    let window = controller.visible_window();
    assert_eq!(window.duration_ms(), Duration::minutes(54).num_milliseconds());
    assert_eq!(window.midpoint(), midpoint);
    assert!(window.start >= t0());
    assert!(window.end <= t0() + Duration::minutes(60));
}

#[test]
fn test_pan_reveals_bolus_past_window_end() {
    let mut controller =
        TimeWindowController::with_defaults(t0(), t0() + Duration::minutes(60));
    for _ in 0..5 {
        controller.zoom_in();
    }
    controller.seek(0.0);
    let window = controller.visible_window();

    let bolus = Bolus::new(
        "Atropine".into(),
        0.5,
        "mg".into(),
        "Dr. Smith".into(),
        window.end + Duration::seconds(1),
    );
    let projector = TimelineProjector::new(t0() + Duration::minutes(60));
    assert!(!projector.is_visible(&bolus, &window));

    controller.pan_right();
    let panned = controller.visible_window();
    assert!(panned.end > window.end);
    assert!(projector.is_visible(&bolus, &panned));
}

#[test]
fn test_out_of_order_rate_change_is_inserted_by_time() {
    let mut registry = MedicationRegistry::new();
    let cri = registry
        .start_cri("Lidocaine", 50.0, "mcg/kg/min", "Dr. Smith", t0())
        .unwrap();
    registry
        .record_rate_change(&cri.id, 30.0, t0() + Duration::minutes(20))
        .unwrap();
    // Double submit from a second device: earlier timestamp arrives later
    registry
        .record_rate_change(&cri.id, 40.0, t0() + Duration::minutes(10))
        .unwrap();

    let cri = registry.get_cri(&cri.id).unwrap();
    let rates: Vec<_> = cri.rate_history.iter().map(|c| c.rate).collect();
    assert_eq!(rates, vec![50.0, 40.0, 30.0]);
    assert_eq!(cri.rate, 30.0);
    assert_eq!(cri.rate_at(t0() + Duration::minutes(15)), Some(40.0));
}

#[test]
fn test_timeline_layout_over_a_procedure() {
    let mut registry = MedicationRegistry::new();
    registry
        .record_bolus("Methadone", 6.0, "mg", "Dr. Smith", t0())
        .unwrap();
    let cri = registry
        .start_cri("Ketamine", 10.0, "mcg/kg/min", "Dr. Smith", t0() + Duration::minutes(20))
        .unwrap();
    registry
        .record_rate_change(&cri.id, 5.0, t0() + Duration::minutes(60))
        .unwrap();
    registry
        .stop_cri(&cri.id, t0() + Duration::minutes(80))
        .unwrap();

    let now = t0() + Duration::minutes(100);
    let mut timeline = MedicationTimeline::new(registry, TimelineConfig::default(), now);
    let bars = timeline.layout(now);
    assert_eq!(bars.len(), 2);

    assert!(matches!(bars[0].record, TimelineRecord::Bolus(_)));
    assert_eq!(bars[0].left_percent, 0.0);
    assert_eq!(bars[0].width_percent, None);

    assert!(matches!(bars[1].record, TimelineRecord::Infusion(_)));
    assert_eq!(bars[1].left_percent, 20.0);
    assert_eq!(bars[1].width_percent, Some(60.0));
    assert_eq!(bars[1].rate_marks.len(), 1);
    assert_eq!(bars[1].rate_marks[0].left_percent, 60.0);
    assert_eq!(bars[1].rate_marks[0].rate, 5.0);
    let segments: Vec<_> = bars[1]
        .segments
        .iter()
        .map(|s| (s.rate, s.left_percent, s.width_percent))
        .collect();
    assert_eq!(segments, vec![(10.0, 20.0, 40.0), (5.0, 60.0, 20.0)]);

    // Zoomed onto the last 50 minutes: the bolus drops out, the infusion is clipped
    for _ in 0..5 {
        timeline.controller_mut().zoom_in();
    }
    timeline.controller_mut().seek(100.0);
    let bars = timeline.layout(now);
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].left_percent, 0.0);
    assert_eq!(bars[0].width_percent, Some(60.0));
    assert_eq!(bars[0].rate_marks[0].left_percent, 20.0);
    let segments: Vec<_> = bars[0]
        .segments
        .iter()
        .map(|s| (s.rate, s.left_percent, s.width_percent))
        .collect();
    assert_eq!(segments, vec![(10.0, 0.0, 20.0), (5.0, 20.0, 40.0)]);
}
