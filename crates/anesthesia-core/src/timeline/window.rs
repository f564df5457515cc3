//! Closed time interval.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A `[start, end]` interval with `start <= end`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window, swapping the bounds if they arrive reversed.
    pub fn new(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// A zero-width window at one instant.
    pub fn point(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }

    pub fn is_empty(&self) -> bool {
        self.duration_ms() <= 0
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    /// Nearest instant inside the window.
    pub fn clamp(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.max(self.start).min(self.end)
    }

    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start + Duration::milliseconds(self.duration_ms() / 2)
    }

    /// Whether `other` lies entirely inside this window.
    pub fn encloses(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}
