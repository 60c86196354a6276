//! Live update fan-out to per-place subscribers
//!
//! Maps a place id to a set of independent subscriber handles, each
//! wrapping a bounded channel drained by one dashboard connection.
//! Publishing is fire-and-forget: a full channel drops the message, a
//! closed channel drops the subscriber, and neither outcome ever
//! propagates to the request that triggered the update.

use crate::domain::types::{epoch_ms, PlaceSnapshot, PlaceState};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Pushed to every subscriber of a place whenever its occupancy changes
#[derive(Debug, Clone, Serialize)]
pub struct PlaceUpdate {
    pub place_id: String,
    pub current_count: u32,
    pub state: PlaceState,
    /// Set when the change was a redirect hold: names the full source
    /// place visitors are being redirected from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_hint: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
}

impl PlaceUpdate {
    pub fn from_snapshot(snapshot: &PlaceSnapshot, redirect_hint: Option<String>) -> Self {
        Self {
            place_id: snapshot.place_id.clone(),
            current_count: snapshot.current_count,
            state: snapshot.state,
            redirect_hint,
            ts: epoch_ms(),
        }
    }
}

pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<PlaceUpdate>,
}

/// Subscriber registry for live updates
pub struct UpdateHub {
    subscribers: Mutex<FxHashMap<String, SmallVec<[Subscriber; 4]>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl UpdateHub {
    /// `buffer` bounds each subscriber's unread backlog; a dashboard that
    /// falls further behind loses updates rather than blocking publishers.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&self, place_id: &str) -> (SubscriberId, mpsc::Receiver<PlaceUpdate>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .entry(place_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        (id, rx)
    }

    /// Remove a subscriber. Removing one that already disconnected is a
    /// no-op, not an error.
    pub fn unsubscribe(&self, place_id: &str, id: SubscriberId) {
        let mut map = self.subscribers.lock();
        if let Some(subs) = map.get_mut(place_id) {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.swap_remove(pos);
            }
            if subs.is_empty() {
                map.remove(place_id);
            }
        }
    }

    /// Fan an update out to every subscriber of its place. Never blocks,
    /// never fails the caller.
    pub fn publish(&self, update: PlaceUpdate) {
        let mut map = self.subscribers.lock();
        let Some(subs) = map.get_mut(&update.place_id) else {
            return;
        };
        subs.retain(|sub| match sub.tx.try_send(update.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(place_id = %update.place_id, subscriber = %sub.id, "update_dropped_lagging");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(place_id = %update.place_id, subscriber = %sub.id, "subscriber_gone");
                false
            }
        });
        if subs.is_empty() {
            map.remove(&update.place_id);
        }
    }

    /// Current subscriber count across all places
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().values().map(SmallVec::len).sum()
    }
}
