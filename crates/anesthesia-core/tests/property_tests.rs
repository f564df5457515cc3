//! Property tests for the calculator, registry and window controller.

use anesthesia_core::dosage::{compute_anticipated_dose, compute_volume};
use anesthesia_core::models::Cri;
use anesthesia_core::registry::MedicationRegistry;
use anesthesia_core::timeline::{TimeWindow, TimeWindowController, TimelineProjector};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// A decimal with up to two fractional digits, as typed.
fn typed_number() -> impl Strategy<Value = (String, f64)> {
    (0u32..100_000).prop_map(|hundredths| {
        let text = format!("{}.{:02}", hundredths / 100, hundredths % 100);
        let value: f64 = text.parse().unwrap();
        (text, value)
    })
}

#[derive(Debug, Clone, Copy)]
enum Nav {
    ZoomIn,
    ZoomOut,
    PanLeft,
    PanRight,
    Seek(f64),
    Reset,
}

fn nav() -> impl Strategy<Value = Nav> {
    prop_oneof![
        Just(Nav::ZoomIn),
        Just(Nav::ZoomOut),
        Just(Nav::PanLeft),
        Just(Nav::PanRight),
        (-50.0f64..150.0).prop_map(Nav::Seek),
        Just(Nav::Reset),
    ]
}

proptest! {
    #[test]
    fn anticipated_dose_uses_last_number(
        (low_text, _low) in typed_number(),
        (high_text, high) in typed_number(),
        separator in prop_oneof![Just("-"), Just(" - "), Just(" to ")],
        weight in 0.1f64..120.0,
    ) {
        let range = format!("{}{}{} mg/kg", low_text, separator, high_text);
        prop_assert_eq!(
            compute_anticipated_dose(&range, weight),
            format!("{:.2}", high * weight)
        );
    }

    #[test]
    fn anticipated_dose_without_numbers_is_empty(
        text in "[a-zA-Z /]{0,20}",
        weight in 0.1f64..120.0,
    ) {
        prop_assert_eq!(compute_anticipated_dose(&text, weight), "");
    }

    #[test]
    fn volume_is_dose_over_leading_concentration(
        (dose_text, dose) in typed_number(),
        (conc_text, conc) in typed_number(),
        suffix in prop_oneof![Just("mg/ml"), Just(" mg/mL"), Just("")],
    ) {
        let concentration = format!("{}{}", conc_text, suffix);
        let expected = if conc == 0.0 {
            String::new()
        } else {
            format!("{:.2}", dose / conc)
        };
        prop_assert_eq!(compute_volume(&dose_text, &concentration), expected);
    }

    #[test]
    fn second_stop_never_moves_end_time(
        first in 0i64..10_000,
        delay in 0i64..10_000,
    ) {
        let mut registry = MedicationRegistry::new();
        let cri = registry
            .start_cri("Ketamine", 10.0, "mcg/kg/min", "Dr. Smith", t0())
            .unwrap();
        let first_stop = t0() + Duration::seconds(first);
        registry.stop_cri(&cri.id, first_stop).unwrap();
        registry
            .stop_cri(&cri.id, first_stop + Duration::seconds(delay))
            .unwrap();

        let stopped = registry.get_cri(&cri.id).unwrap();
        prop_assert_eq!(stopped.end_time, Some(first_stop));
        prop_assert_eq!(registry.audit_log().len(), 2);
    }

    #[test]
    fn rate_history_stays_sorted(
        steps in prop::collection::vec((0i64..600, 0.1f64..100.0), 0..20),
    ) {
        let mut registry = MedicationRegistry::new();
        let cri = registry
            .start_cri("Fentanyl", 5.0, "mcg/kg/hr", "Dr. Smith", t0())
            .unwrap();
        let mut at = t0();
        for (gap, rate) in &steps {
            at += Duration::seconds(*gap);
            registry.record_rate_change(&cri.id, *rate, at).unwrap();
        }

        let cri = registry.get_cri(&cri.id).unwrap();
        prop_assert_eq!(cri.rate_history.len(), steps.len() + 1);
        prop_assert!(cri
            .rate_history
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
        prop_assert_eq!(cri.rate_history.last().unwrap().rate, cri.rate);
    }

    #[test]
    fn position_is_always_a_percentage(
        window_start in -100_000i64..100_000,
        window_len in 0i64..100_000,
        at in -1_000_000i64..1_000_000,
    ) {
        let start = t0() + Duration::seconds(window_start);
        let window = TimeWindow::new(start, start + Duration::seconds(window_len));
        let projector = TimelineProjector::new(t0());
        let position = projector.position_percent(t0() + Duration::seconds(at), &window);
        prop_assert!((0.0..=100.0).contains(&position));
    }

    #[test]
    fn running_cri_from_before_window_is_visible_once_now_reaches_it(
        lead in 1i64..10_000,
        window_len in 0i64..10_000,
        now_offset in -20_000i64..20_000,
    ) {
        let window_start = t0() + Duration::seconds(lead);
        let window = TimeWindow::new(window_start, window_start + Duration::seconds(window_len));
        let cri = Cri::new(
            "Ketamine".into(),
            10.0,
            "mcg/kg/min".into(),
            "Dr. Smith".into(),
            t0(),
        );
        let now = window_start + Duration::seconds(now_offset);
        let projector = TimelineProjector::new(now);
        prop_assert_eq!(projector.is_visible(&cri, &window), window.start <= now);
    }

    #[test]
    fn visible_window_stays_inside_data(
        range_minutes in 0i64..600,
        actions in prop::collection::vec(nav(), 0..40),
    ) {
        let data_end = t0() + Duration::minutes(range_minutes);
        let mut controller = TimeWindowController::with_defaults(t0(), data_end);
        for action in actions {
            match action {
                Nav::ZoomIn => controller.zoom_in(),
                Nav::ZoomOut => controller.zoom_out(),
                Nav::PanLeft => controller.pan_left(),
                Nav::PanRight => controller.pan_right(),
                Nav::Seek(position) => controller.seek(position),
                Nav::Reset => controller.reset_zoom(),
            }
            let visible = controller.visible_window();
            prop_assert!(t0() <= visible.start);
            prop_assert!(visible.start <= visible.end);
            prop_assert!(visible.end <= data_end);
            prop_assert!((10..=100).contains(&controller.zoom_percent()));
        }
    }
}
