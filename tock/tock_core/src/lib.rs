//! # Tock Core
//!
//! `tock_core` provides the building blocks shared by the Tock scheduler
//! crates: error types, a monotonic time type, injectable clocks, and the
//! process-wide scheduler feature configuration.
//!
//! ## Crate Structure
//!
//! - **error**: Error types for all Tock components
//! - **time**: `TimeTicks`, a monotonic instant with tick-grid snapping
//! - **clock**: The `TickClock` time source trait and its implementations
//! - **features**: Wake-up alignment and leeway configuration

pub mod clock;
pub mod error;
pub mod features;
pub mod time;

// Re-export key types for convenience
pub use clock::{DefaultTickClock, MockTickClock, TickClock};
pub use error::{ConcurrencyError, ConfigError, Error, Result};
pub use features::{Feature, SchedulerFeatures, ScopedFeatureOverride};
pub use time::TimeTicks;
