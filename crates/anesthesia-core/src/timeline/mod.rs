//! Medication timeline: visible window, projection and layout.
//!
//! ```text
//! MedicationRegistry ──┐
//!                      ├─► MedicationTimeline::layout(now) ─► Vec<TimelineBar>
//! TimeWindowController ┘          (TimelineProjector)
//! ```

mod controller;
mod projector;
mod view_model;
mod window;

pub use controller::*;
pub use projector::*;
pub use view_model::*;
pub use window::*;
