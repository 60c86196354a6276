//! Shared types for the smart-queue service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Generate an unguessable reservation token (UUIDv4)
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

/// Gate sensor event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Enter,
    Exit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Enter => "enter",
            EventKind::Exit => "exit",
        }
    }
}

/// Error for an event kind the sensors never produce.
/// Surfaced to the client as a 400, nothing mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind(pub String);

impl std::fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unrecognized event kind: {}", self.0)
    }
}

impl std::error::Error for UnknownEventKind {}

impl std::str::FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enter" => Ok(EventKind::Enter),
            "exit" => Ok(EventKind::Exit),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

/// Derived place state, computed from count and capacity, never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaceState {
    Normal,
    Full,
}

impl PlaceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceState::Normal => "NORMAL",
            PlaceState::Full => "FULL",
        }
    }
}

/// Count/capacity pair returned by every guarded counter operation,
/// so callers never re-read occupancy racily.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub count: u32,
    pub capacity: u32,
}

impl Occupancy {
    #[inline]
    pub fn state(&self) -> PlaceState {
        if self.count >= self.capacity {
            PlaceState::Full
        } else {
            PlaceState::Normal
        }
    }
}

/// Point-in-time view of one place for status queries and live updates
#[derive(Debug, Clone, Serialize)]
pub struct PlaceSnapshot {
    pub place_id: String,
    pub current_count: u32,
    pub capacity: u32,
    pub state: PlaceState,
}

/// One recorded gate event. Immutable once appended.
#[derive(Debug, Clone, Serialize)]
pub struct VisitEvent {
    pub place_id: String,
    #[serde(rename = "event")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub time: DateTime<Utc>,
    pub resulting_count: u32,
}

/// A redirect offer holding one occupancy unit at the destination
/// until confirmed or expired.
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub token: String,
    pub from_place: String,
    pub to_place: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confirmed: bool,
}

impl Reservation {
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Parsed inbound gate event, validated at the transport edge
#[derive(Debug, Clone)]
pub struct GateEvent {
    pub place_id: String,
    pub kind: EventKind,
    /// Client-supplied idempotency key; duplicate detection is skipped
    /// when absent.
    pub external_id: Option<String>,
    /// Defaults to receipt time when the sensor did not supply one.
    pub time: Option<DateTime<Utc>>,
}
