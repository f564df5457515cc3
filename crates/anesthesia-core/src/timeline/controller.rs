//! Zoom and pan over the full data range.
//!
//! Windowing is purely time-based: the visible width is a percentage of the
//! full range's duration, regardless of how densely records are spaced.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::TimelineConfig;

use super::window::TimeWindow;

/// Keeps the visible window inside the data range while zooming and panning.
///
/// Invariant: `data.start <= visible.start <= visible.end <= data.end`.
#[derive(Debug, Clone)]
pub struct TimeWindowController {
    data: TimeWindow,
    visible: TimeWindow,
    zoom_percent: u32,
    config: TimelineConfig,
}

impl TimeWindowController {
    /// Start fully zoomed out over `[data_start, data_end]`.
    pub fn new(data_start: DateTime<Utc>, data_end: DateTime<Utc>, config: TimelineConfig) -> Self {
        let data = TimeWindow::new(data_start, data_end);
        Self {
            data,
            visible: data,
            zoom_percent: 100,
            config,
        }
    }

    pub fn with_defaults(data_start: DateTime<Utc>, data_end: DateTime<Utc>) -> Self {
        Self::new(data_start, data_end, TimelineConfig::default())
    }

    pub fn visible_window(&self) -> TimeWindow {
        self.visible
    }

    pub fn data_range(&self) -> TimeWindow {
        self.data
    }

    /// Share of the full range currently shown, 100 = fully zoomed out.
    pub fn zoom_percent(&self) -> u32 {
        self.zoom_percent
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// A range of zero duration cannot be zoomed or panned.
    fn is_degenerate(&self) -> bool {
        self.data.is_empty()
    }

    fn target_width_ms(&self) -> i64 {
        let full = self.data.duration_ms();
        let width = (full as f64 * f64::from(self.zoom_percent) / 100.0).round() as i64;
        width.clamp(0, full)
    }

    /// Place a window of `width_ms` starting at `start`, shifting it inward
    /// if it would leave the data range.
    fn place_from(&mut self, start: DateTime<Utc>, width_ms: i64) {
        let width = Duration::milliseconds(width_ms.clamp(0, self.data.duration_ms()));
        let mut start = start.max(self.data.start);
        let mut end = start + width;
        if end > self.data.end {
            end = self.data.end;
            start = end - width;
        }
        self.visible = TimeWindow { start, end };
    }

    fn place_centered(&mut self, center: DateTime<Utc>) {
        let width_ms = self.target_width_ms();
        self.place_from(center - Duration::milliseconds(width_ms / 2), width_ms);
    }

    /// Show a smaller share of the range around the current midpoint.
    pub fn zoom_in(&mut self) {
        if self.is_degenerate() {
            return;
        }
        let next = self
            .zoom_percent
            .saturating_sub(self.config.zoom_step_percent)
            .max(self.config.min_zoom_percent);
        if next >= self.zoom_percent {
            return;
        }
        self.zoom_percent = next;
        self.place_centered(self.visible.midpoint());
        debug!(zoom_percent = next, window = ?self.visible, "zoomed in");
    }

    /// Show a larger share of the range; reaching 100 resets the zoom.
    pub fn zoom_out(&mut self) {
        if self.is_degenerate() {
            return;
        }
        let next = (self.zoom_percent + self.config.zoom_step_percent).min(100);
        if next == 100 {
            self.reset_zoom();
            return;
        }
        self.zoom_percent = next;
        self.place_centered(self.visible.midpoint());
        debug!(zoom_percent = next, window = ?self.visible, "zoomed out");
    }

    fn pan_shift_ms(&self) -> i64 {
        (self.visible.duration_ms() as f64 * self.config.pan_fraction).round() as i64
    }

    /// Move the window earlier by a fraction of its width.
    pub fn pan_left(&mut self) {
        if self.is_degenerate() {
            return;
        }
        let width = self.visible.duration_ms();
        let start = self.visible.start - Duration::milliseconds(self.pan_shift_ms());
        self.place_from(start, width);
    }

    /// Move the window later by a fraction of its width.
    pub fn pan_right(&mut self) {
        if self.is_degenerate() {
            return;
        }
        let width = self.visible.duration_ms();
        let start = self.visible.start + Duration::milliseconds(self.pan_shift_ms());
        self.place_from(start, width);
    }

    /// Show the full range.
    pub fn reset_zoom(&mut self) {
        self.zoom_percent = 100;
        self.visible = self.data;
    }

    /// Move the window to a slider position: 0 aligns it with the start of
    /// the data, 100 with the end. Width is preserved.
    pub fn seek(&mut self, position: f64) {
        if self.is_degenerate() || !position.is_finite() {
            return;
        }
        let position = position.clamp(0.0, 100.0);
        let width = self.visible.duration_ms();
        let slack = self.data.duration_ms() - width;
        let offset = (slack as f64 * position / 100.0).round() as i64;
        self.place_from(self.data.start + Duration::milliseconds(offset), width);
    }

    /// Slider position of the current window, inverse of [`Self::seek`].
    pub fn position(&self) -> f64 {
        let slack = self.data.duration_ms() - self.visible.duration_ms();
        if slack <= 0 {
            return 0.0;
        }
        let offset = (self.visible.start - self.data.start).num_milliseconds();
        (offset as f64 * 100.0 / slack as f64).clamp(0.0, 100.0)
    }

    /// Replace the data range, keeping the zoom level. A fully zoomed-out
    /// window follows the new range; a zoomed window keeps its midpoint
    /// where possible.
    pub fn set_data_range(&mut self, data_start: DateTime<Utc>, data_end: DateTime<Utc>) {
        let data = TimeWindow::new(data_start, data_end);
        if data == self.data {
            return;
        }
        self.data = data;
        if self.is_degenerate() || self.zoom_percent == 100 {
            self.reset_zoom();
        } else {
            self.place_centered(self.visible.midpoint());
        }
    }
}
