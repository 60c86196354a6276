//! Domain models - core data types for occupancy tracking
//!
//! This module contains the canonical data types used throughout the system:
//! - `EventKind` / `GateEvent` - gate sensor events
//! - `PlaceSnapshot` / `Occupancy` / `PlaceState` - per-place occupancy views
//! - `VisitEvent` - one recorded gate event
//! - `Reservation` - a redirect offer with a capacity hold

pub mod types;
