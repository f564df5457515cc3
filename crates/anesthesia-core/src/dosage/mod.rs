//! Dosage calculation for anesthesia plans.
//!
//! - `calculator`: pure dose / volume / hourly-rate functions
//! - `derived`: which plan fields are derived from which inputs

mod calculator;
mod derived;

pub use calculator::*;
pub use derived::*;
