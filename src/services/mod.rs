//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `registry` - per-place capacity and occupancy counters
//! - `event_log` - append-only visit log and duplicate suppression
//! - `reservations` - redirect reservation lifecycle and capacity holds
//! - `dispatcher` - end-to-end orchestration of one gate event

pub mod dispatcher;
pub mod event_log;
pub mod registry;
pub mod reservations;

// Re-export commonly used types
pub use dispatcher::{EventDispatcher, EventOutcome, EventStatus};
pub use event_log::EventLog;
pub use registry::{Admission, PlaceRegistry};
pub use reservations::{ConfirmOutcome, ReservationManager};
