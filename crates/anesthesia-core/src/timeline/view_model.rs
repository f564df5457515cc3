//! Renderable layout of the medication timeline.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::TimelineConfig;
use crate::models::{Bolus, Cri};
use crate::registry::{MedicationCommand, MedicationEvent, MedicationRegistry, RegistryResult};

use super::controller::TimeWindowController;
use super::projector::TimelineProjector;
use super::window::TimeWindow;

/// The record behind a bar or marker.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineRecord {
    Infusion(Cri),
    Bolus(Bolus),
}

impl TimelineRecord {
    pub fn id(&self) -> &str {
        match self {
            TimelineRecord::Infusion(cri) => &cri.id,
            TimelineRecord::Bolus(bolus) => &bolus.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TimelineRecord::Infusion(cri) => &cri.name,
            TimelineRecord::Bolus(bolus) => &bolus.name,
        }
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        match self {
            TimelineRecord::Infusion(cri) => cri.start_time,
            TimelineRecord::Bolus(bolus) => bolus.timestamp,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            TimelineRecord::Infusion(_) => 0,
            TimelineRecord::Bolus(_) => 1,
        }
    }
}

/// A rate change drawn inside an infusion bar.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct RateMark {
    pub at: DateTime<Utc>,
    pub left_percent: f64,
    pub rate: f64,
}

/// A stretch of an infusion bar at one rate, clipped to the window.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct SegmentBar {
    pub rate: f64,
    pub left_percent: f64,
    pub width_percent: f64,
}

/// One visible item, ready for layout.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimelineBar {
    pub record: TimelineRecord,
    /// Left edge as a percentage of the visible window
    pub left_percent: f64,
    /// Bar width for infusions; `None` for bolus markers
    pub width_percent: Option<f64>,
    /// Visible rate changes after the initial rate
    pub rate_marks: Vec<RateMark>,
    /// Visible constant-rate stretches of an infusion, in time order
    pub segments: Vec<SegmentBar>,
}

/// Registry plus visible window: what the UI layer renders from.
#[derive(Debug, Clone)]
pub struct MedicationTimeline {
    registry: MedicationRegistry,
    controller: TimeWindowController,
}

impl MedicationTimeline {
    /// Build a timeline over `registry`, fully zoomed out.
    pub fn new(registry: MedicationRegistry, config: TimelineConfig, now: DateTime<Utc>) -> Self {
        let range = data_range(&registry, now);
        Self {
            registry,
            controller: TimeWindowController::new(range.start, range.end, config),
        }
    }

    pub fn registry(&self) -> &MedicationRegistry {
        &self.registry
    }

    pub fn controller(&self) -> &TimeWindowController {
        &self.controller
    }

    /// Zoom, pan and seek go through the controller directly.
    pub fn controller_mut(&mut self) -> &mut TimeWindowController {
        &mut self.controller
    }

    pub fn visible_window(&self) -> TimeWindow {
        self.controller.visible_window()
    }

    /// Apply a command to the registry and extend the data range.
    pub fn apply(
        &mut self,
        command: MedicationCommand,
        now: DateTime<Utc>,
    ) -> RegistryResult<Option<MedicationEvent>> {
        let event = self.registry.apply(command)?;
        self.refresh_range(now);
        Ok(event)
    }

    /// Swap in a new registry (e.g. after a load or a persisted mutation).
    pub fn replace_registry(&mut self, registry: MedicationRegistry, now: DateTime<Utc>) {
        self.registry = registry;
        self.refresh_range(now);
    }

    /// Recompute the data range from the records and the current time.
    pub fn refresh_range(&mut self, now: DateTime<Utc>) {
        let range = data_range(&self.registry, now);
        self.controller.set_data_range(range.start, range.end);
    }

    /// Visible bars and markers, ordered by start instant.
    pub fn layout(&self, now: DateTime<Utc>) -> Vec<TimelineBar> {
        let window = self.controller.visible_window();
        let projector = TimelineProjector::new(now);
        let mut bars = Vec::new();

        for cri in self.registry.list_all() {
            if !projector.is_visible(cri, &window) {
                continue;
            }
            let all_segments = cri.rate_segments(now);
            let rate_marks = all_segments
                .iter()
                .skip(1)
                .filter(|segment| window.contains(segment.start))
                .map(|segment| RateMark {
                    at: segment.start,
                    left_percent: projector.position_percent(segment.start, &window),
                    rate: segment.rate,
                })
                .collect();
            let segments = all_segments
                .iter()
                .filter(|segment| segment.start <= window.end && segment.end >= window.start)
                .map(|segment| SegmentBar {
                    rate: segment.rate,
                    left_percent: projector.position_percent(segment.start, &window),
                    width_percent: projector.width_percent(segment.start, Some(segment.end), &window),
                })
                .collect();
            bars.push(TimelineBar {
                left_percent: projector.position_percent(cri.start_time, &window),
                width_percent: Some(projector.width_percent(cri.start_time, cri.end_time, &window)),
                rate_marks,
                segments,
                record: TimelineRecord::Infusion(cri.clone()),
            });
        }

        for bolus in self.registry.list_boluses() {
            if !projector.is_visible(bolus, &window) {
                continue;
            }
            bars.push(TimelineBar {
                left_percent: projector.position_percent(bolus.timestamp, &window),
                width_percent: None,
                rate_marks: Vec::new(),
                segments: Vec::new(),
                record: TimelineRecord::Bolus(bolus.clone()),
            });
        }

        bars.sort_by(|a, b| compare_records(&a.record, &b.record));
        bars
    }
}

fn compare_records(a: &TimelineRecord, b: &TimelineRecord) -> Ordering {
    a.starts_at()
        .cmp(&b.starts_at())
        .then(a.kind_rank().cmp(&b.kind_rank()))
        .then_with(|| a.id().cmp(b.id()))
}

/// Earliest record instant to the later of `now` and the latest record
/// instant. An empty registry gives a zero-width range at `now`.
pub fn data_range(registry: &MedicationRegistry, now: DateTime<Utc>) -> TimeWindow {
    match registry.time_extent() {
        Some((earliest, latest)) => TimeWindow::new(earliest, latest.max(now)),
        None => TimeWindow::point(now),
    }
}
