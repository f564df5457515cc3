//! Administered medications: boluses and constant-rate infusions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single administration of a fixed dose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bolus {
    /// Record ID (local UUID until the store assigns one)
    pub id: String,
    /// Drug name
    pub name: String,
    /// Dose given
    pub dose: f64,
    /// Dose unit (e.g. "mg", "mcg")
    pub unit: String,
    /// When it was given
    pub timestamp: DateTime<Utc>,
    /// Clinician who gave it
    pub administered_by: String,
}

impl Bolus {
    /// Create a bolus with a fresh local ID.
    pub fn new(
        name: String,
        dose: f64,
        unit: String,
        administered_by: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            dose,
            unit,
            timestamp,
            administered_by,
        }
    }
}

/// One entry in a CRI's rate history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateChange {
    pub timestamp: DateTime<Utc>,
    pub rate: f64,
}

/// A span of time during which a CRI ran at one rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSegment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rate: f64,
}

/// A constant-rate infusion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cri {
    /// Record ID (local UUID until the store assigns one)
    pub id: String,
    /// Drug name
    pub name: String,
    /// Current rate; always the rate of the last history entry
    pub rate: f64,
    /// Rate unit (e.g. "mcg/kg/min", "ml/hr")
    pub unit: String,
    /// When the infusion began
    pub start_time: DateTime<Utc>,
    /// When the infusion was stopped, if it has been
    pub end_time: Option<DateTime<Utc>>,
    /// Every rate the infusion has had, ascending by timestamp
    pub rate_history: Vec<RateChange>,
    /// Clinician who started it
    pub administered_by: String,
}

impl Cri {
    /// Start an infusion with a one-entry history.
    pub fn new(
        name: String,
        rate: f64,
        unit: String,
        administered_by: String,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            rate,
            unit,
            start_time,
            end_time: None,
            rate_history: vec![RateChange {
                timestamp: start_time,
                rate,
            }],
            administered_by,
        }
    }

    /// Whether the infusion is still running.
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Timestamp of the most recent rate entry.
    pub fn last_change_at(&self) -> DateTime<Utc> {
        self.rate_history
            .last()
            .map(|c| c.timestamp)
            .unwrap_or(self.start_time)
    }

    /// Insert a rate entry after every entry at or before its timestamp,
    /// then make `rate` agree with the last entry.
    pub(crate) fn insert_rate_change(&mut self, change: RateChange) {
        let index = self
            .rate_history
            .partition_point(|existing| existing.timestamp <= change.timestamp);
        self.rate_history.insert(index, change);
        if let Some(last) = self.rate_history.last() {
            self.rate = last.rate;
        }
    }

    /// Rate in effect at `at`, if the infusion was running then.
    pub fn rate_at(&self, at: DateTime<Utc>) -> Option<f64> {
        if at < self.start_time || self.end_time.is_some_and(|end| at > end) {
            return None;
        }
        self.rate_history
            .iter()
            .take_while(|change| change.timestamp <= at)
            .last()
            .map(|change| change.rate)
    }

    /// Split the infusion into constant-rate segments, ending at `end_time`
    /// or, while running, at `now`.
    pub fn rate_segments(&self, now: DateTime<Utc>) -> Vec<RateSegment> {
        let end = self.end_time.unwrap_or(now.max(self.last_change_at()));
        self.rate_history
            .iter()
            .enumerate()
            .map(|(i, change)| RateSegment {
                start: change.timestamp,
                end: self
                    .rate_history
                    .get(i + 1)
                    .map(|next| next.timestamp)
                    .unwrap_or(end),
                rate: change.rate,
            })
            .collect()
    }

    /// Restore the history invariants on a record loaded from elsewhere:
    /// non-empty, sorted, and `rate` equal to the last entry.
    pub fn normalize(&mut self) {
        if self.rate_history.is_empty() {
            self.rate_history.push(RateChange {
                timestamp: self.start_time,
                rate: self.rate,
            });
        }
        self.rate_history.sort_by_key(|change| change.timestamp);
        if let Some(last) = self.rate_history.last() {
            self.rate = last.rate;
        }
    }
}
