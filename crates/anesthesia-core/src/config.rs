//! Timeline navigation settings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Zoom and pan behaviour of the timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimelineConfig {
    /// Percentage points added or removed per zoom step
    pub zoom_step_percent: u32,
    /// Smallest share of the full range the window may show
    pub min_zoom_percent: u32,
    /// Fraction of the window width moved per pan
    pub pan_fraction: f64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            zoom_step_percent: 10,
            min_zoom_percent: 10,
            pan_fraction: 0.25,
        }
    }
}

impl TimelineConfig {
    /// Parse and validate a JSON config. Missing keys take their defaults.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: TimelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.zoom_step_percent == 0 || self.zoom_step_percent >= 100 {
            return Err(ConfigError::Invalid(format!(
                "zoom_step_percent must be in 1..=99, got {}",
                self.zoom_step_percent
            )));
        }
        if self.min_zoom_percent == 0 || self.min_zoom_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "min_zoom_percent must be in 1..=100, got {}",
                self.min_zoom_percent
            )));
        }
        if !(self.pan_fraction > 0.0 && self.pan_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "pan_fraction must be in (0, 1], got {}",
                self.pan_fraction
            )));
        }
        Ok(())
    }
}
