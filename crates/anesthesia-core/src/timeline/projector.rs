//! Map record timestamps into percentages of a visible window.

use chrono::{DateTime, Utc};

use crate::models::{Bolus, Cri};

use super::window::TimeWindow;

/// Extent of a record on the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    /// A point in time (bolus)
    Instant(DateTime<Utc>),
    /// A running or finished interval (CRI); `end` is `None` while running
    Interval {
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    },
}

/// Anything that can be placed on the timeline.
pub trait TimelineEntry {
    fn span(&self) -> Span;
}

impl TimelineEntry for Bolus {
    fn span(&self) -> Span {
        Span::Instant(self.timestamp)
    }
}

impl TimelineEntry for Cri {
    fn span(&self) -> Span {
        Span::Interval {
            start: self.start_time,
            end: self.end_time,
        }
    }
}

/// Projects records into a window as seen at a fixed `now`.
///
/// Outputs are always within `[0, 100]`, so rendering code does not clamp.
#[derive(Debug, Clone, Copy)]
pub struct TimelineProjector {
    now: DateTime<Utc>,
}

impl TimelineProjector {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Whether any part of the record falls inside the window.
    pub fn is_visible<E: TimelineEntry + ?Sized>(&self, entry: &E, window: &TimeWindow) -> bool {
        match entry.span() {
            Span::Instant(at) => window.contains(at),
            Span::Interval { start, end } => {
                start <= window.end && end.unwrap_or(self.now) >= window.start
            }
        }
    }

    /// Horizontal position of `at` within the window, in percent.
    pub fn position_percent(&self, at: DateTime<Utc>, window: &TimeWindow) -> f64 {
        let duration = window.duration_ms();
        if duration <= 0 {
            return 0.0;
        }
        let offset = (window.clamp(at) - window.start).num_milliseconds();
        (offset as f64 * 100.0 / duration as f64).clamp(0.0, 100.0)
    }

    /// Width of `[start, end]` within the window, in percent. A running
    /// interval ends at `min(now, window.end)`.
    pub fn width_percent(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        window: &TimeWindow,
    ) -> f64 {
        let duration = window.duration_ms();
        if duration <= 0 {
            return 0.0;
        }
        let end = end.unwrap_or_else(|| self.now.min(window.end));
        let clamped_start = window.clamp(start);
        let clamped_end = window.clamp(end);
        let covered = (clamped_end - clamped_start).num_milliseconds().max(0);
        (covered as f64 * 100.0 / duration as f64).clamp(0.0, 100.0)
    }
}
