//! Core types - pure abstractions shared across the codebase.

mod clock;
mod location;
mod stage;

pub use clock::{Clock, ManualClock, Millis, SystemClock, system_time_millis};
pub use location::SourceLocation;
pub use stage::ProjectStage;
