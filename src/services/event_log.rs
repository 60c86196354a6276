//! Append-only log of recorded gate events
//!
//! Serves two purposes: duplicate suppression for client-supplied event
//! ids, and newest-first history queries. All uniqueness decisions happen
//! inside the log mutex - a constraint, not a prior read.
//!
//! Idempotency protocol for events that carry an external id:
//! 1. `claim(id)` before any side effect. Exactly one concurrent caller
//!    gets `Claimed`; the rest observe `Duplicate` and never touch the
//!    occupancy counters.
//! 2. `record(...)` fills the claim with the final event, or
//!    `release_claim(id)` drops it when the attempt produced no event
//!    (a FULL enter is not logged).

use crate::domain::types::{EventKind, VisitEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Outcome of reserving an external event id before applying side effects
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// Id reserved; the caller must `record` or `release_claim`
    Claimed,
    /// Already handled. `Some` carries the recorded event; `None` means
    /// another request holds the claim and its record is still in flight.
    Duplicate(Option<VisitEvent>),
}

/// Outcome of appending a record
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Recorded,
    /// The external id was already recorded; carries the winner's event.
    /// The caller must treat this as "already handled", not as an error.
    Duplicate(VisitEvent),
}

#[derive(Debug, Clone, Copy)]
enum ExternalEntry {
    /// Claimed, side effects in flight, no record yet
    Pending,
    /// Recorded at this index in `events`
    Recorded(usize),
}

#[derive(Default)]
struct LogInner {
    events: Vec<VisitEvent>,
    by_place: FxHashMap<String, Vec<usize>>,
    by_external_id: FxHashMap<String, ExternalEntry>,
}

#[derive(Default)]
pub struct EventLog {
    inner: Mutex<LogInner>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// O(1) lookup of a completed record by external id
    pub fn find(&self, external_id: &str) -> Option<VisitEvent> {
        let inner = self.inner.lock();
        match inner.by_external_id.get(external_id) {
            Some(ExternalEntry::Recorded(idx)) => inner.events.get(*idx).cloned(),
            _ => None,
        }
    }

    /// Check whether an external id has been recorded
    pub fn is_duplicate(&self, external_id: &str) -> bool {
        matches!(
            self.inner.lock().by_external_id.get(external_id),
            Some(ExternalEntry::Recorded(_))
        )
    }

    /// Reserve an external id before applying side effects
    pub fn claim(&self, external_id: &str) -> ClaimOutcome {
        let mut inner = self.inner.lock();
        match inner.by_external_id.get(external_id) {
            Some(ExternalEntry::Recorded(idx)) => {
                let event = inner.events.get(*idx).cloned();
                ClaimOutcome::Duplicate(event)
            }
            Some(ExternalEntry::Pending) => ClaimOutcome::Duplicate(None),
            None => {
                inner.by_external_id.insert(external_id.to_string(), ExternalEntry::Pending);
                ClaimOutcome::Claimed
            }
        }
    }

    /// Drop an unfilled claim. A completed record is left untouched.
    pub fn release_claim(&self, external_id: &str) {
        let mut inner = self.inner.lock();
        if matches!(inner.by_external_id.get(external_id), Some(ExternalEntry::Pending)) {
            inner.by_external_id.remove(external_id);
        }
    }

    /// Append a record, filling the claim when an external id is present.
    /// Fails with DUPLICATE when the id is already recorded.
    pub fn record(
        &self,
        place_id: &str,
        kind: EventKind,
        external_id: Option<&str>,
        time: DateTime<Utc>,
        resulting_count: u32,
    ) -> RecordOutcome {
        let mut inner = self.inner.lock();
        if let Some(id) = external_id {
            if let Some(ExternalEntry::Recorded(idx)) = inner.by_external_id.get(id) {
                if let Some(prior) = inner.events.get(*idx).cloned() {
                    return RecordOutcome::Duplicate(prior);
                }
            }
        }

        let idx = inner.events.len();
        inner.events.push(VisitEvent {
            place_id: place_id.to_string(),
            kind,
            external_id: external_id.map(str::to_string),
            time,
            resulting_count,
        });
        inner.by_place.entry(place_id.to_string()).or_default().push(idx);
        if let Some(id) = external_id {
            inner.by_external_id.insert(id.to_string(), ExternalEntry::Recorded(idx));
        }
        RecordOutcome::Recorded
    }

    /// Paginated history for one place, newest first. Page is 0-based.
    /// No side effects.
    pub fn query(&self, place_id: &str, page: usize, page_size: usize) -> Vec<VisitEvent> {
        let inner = self.inner.lock();
        let Some(indices) = inner.by_place.get(place_id) else {
            return Vec::new();
        };
        indices
            .iter()
            .rev()
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .filter_map(|idx| inner.events.get(*idx).cloned())
            .collect()
    }

    /// Total number of recorded events
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
