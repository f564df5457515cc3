//! Domain models for anesthesia medication records.

mod dosage;
mod medication;

pub use dosage::*;
pub use medication::*;
