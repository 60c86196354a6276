//! Per-place occupancy registry
//!
//! Single source of truth for capacity and live occupancy. Places are
//! created lazily on first reference and never deleted. All counter
//! mutations go through a per-place mutex; the outer map lock is held only
//! for lookup/insert, so operations on different places never block each
//! other.
//!
//! Key behaviors:
//! - try_enter/hold are one guarded check-and-increment (`count >= capacity`
//!   rejects), so the count can never exceed capacity
//! - exit/release are one guarded decrement floored at 0 (sensors are
//!   unreliable; an exit on an empty place is a no-op)
//! - NORMAL/FULL is derived from count and capacity on demand, never stored

use crate::domain::types::{Occupancy, PlaceSnapshot};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Result of a guarded check-and-increment on one place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(Occupancy),
    Full(Occupancy),
}

#[derive(Debug)]
struct Place {
    capacity: u32,
    current_count: u32,
}

pub struct PlaceRegistry {
    places: RwLock<FxHashMap<String, Arc<Mutex<Place>>>>,
    default_capacity: u32,
}

impl PlaceRegistry {
    pub fn new(default_capacity: u32) -> Self {
        Self { places: RwLock::new(FxHashMap::default()), default_capacity }
    }

    /// Create a registry pre-seeded with configured places, so redirect
    /// targets exist before their first event.
    pub fn with_places<I>(default_capacity: u32, seeded: I) -> Self
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        let registry = Self::new(default_capacity);
        {
            let mut map = registry.places.write();
            for (place_id, capacity) in seeded {
                map.entry(place_id)
                    .or_insert_with(|| Arc::new(Mutex::new(Place { capacity, current_count: 0 })));
            }
        }
        registry
    }

    /// Look up or lazily create a place. `entry().or_insert_with` under the
    /// write lock guarantees concurrent first access never race-creates
    /// duplicates.
    fn place(&self, place_id: &str) -> Arc<Mutex<Place>> {
        if let Some(place) = self.places.read().get(place_id) {
            return place.clone();
        }
        self.places
            .write()
            .entry(place_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Place { capacity: self.default_capacity, current_count: 0 }))
            })
            .clone()
    }

    /// Resolve a place, creating it with the default capacity and count 0
    /// if this is its first reference. Idempotent.
    pub fn get_or_create(&self, place_id: &str) -> PlaceSnapshot {
        self.snapshot(place_id)
    }

    /// Atomic check-and-increment: admits and increments when
    /// `current_count < capacity`, otherwise returns FULL without mutating.
    pub fn try_enter(&self, place_id: &str) -> Admission {
        let place = self.place(place_id);
        let mut guard = place.lock();
        if guard.current_count >= guard.capacity {
            Admission::Full(Occupancy { count: guard.current_count, capacity: guard.capacity })
        } else {
            guard.current_count += 1;
            Admission::Admitted(Occupancy { count: guard.current_count, capacity: guard.capacity })
        }
    }

    /// Atomic decrement floored at 0. Returns the resulting occupancy.
    pub fn exit(&self, place_id: &str) -> Occupancy {
        let place = self.place(place_id);
        let mut guard = place.lock();
        guard.current_count = guard.current_count.saturating_sub(1);
        Occupancy { count: guard.current_count, capacity: guard.capacity }
    }

    /// Claim a destination slot for a reservation. A hold IS an occupancy
    /// unit, so this is the same guarded operation as try_enter.
    pub fn hold(&self, place_id: &str) -> Admission {
        self.try_enter(place_id)
    }

    /// Revert a hold. Same guarded operation as exit.
    pub fn release(&self, place_id: &str) -> Occupancy {
        self.exit(place_id)
    }

    /// Point-in-time view of one place, creating it if absent (a status
    /// query counts as first reference).
    pub fn snapshot(&self, place_id: &str) -> PlaceSnapshot {
        let place = self.place(place_id);
        let guard = place.lock();
        let occ = Occupancy { count: guard.current_count, capacity: guard.capacity };
        PlaceSnapshot {
            place_id: place_id.to_string(),
            current_count: occ.count,
            capacity: occ.capacity,
            state: occ.state(),
        }
    }

    /// All known places other than `source` with spare capacity, ascending
    /// by place id. The ordering is the deterministic tie-break for
    /// redirect target selection.
    pub fn alternatives(&self, source: &str) -> Vec<String> {
        let map = self.places.read();
        let mut candidates: Vec<String> = map
            .iter()
            .filter(|(place_id, place)| {
                if place_id.as_str() == source {
                    return false;
                }
                let guard = place.lock();
                guard.current_count < guard.capacity
            })
            .map(|(place_id, _)| place_id.clone())
            .collect();
        candidates.sort();
        candidates
    }

    /// Number of places known to the registry
    pub fn place_count(&self) -> usize {
        self.places.read().len()
    }
}
