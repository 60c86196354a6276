//! Reservation lifecycle and the provisional capacity hold
//!
//! Sole owner and sole mutator of reservation records. Creating a
//! reservation holds one occupancy unit at the destination *first*; no
//! record exists unless the hold was admitted, and the hold is released
//! exactly once - on expiry, never on confirmation (confirmation converts
//! it into a permanent entry).
//!
//! All records live under one mutex, so confirm, sweep and create on the
//! same token are serialized: exactly one of {confirm, expire} wins and
//! the loser observes the terminal state. Lock ordering is always
//! reservation map -> place mutex, never the reverse.

use crate::domain::types::{new_token, Reservation};
use crate::services::registry::{Admission, PlaceRegistry};
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of presenting a token at a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    /// No such token
    Invalid,
    /// Monotonic flag already set; no further mutation
    AlreadyConfirmed,
    /// Presented at a gate other than the reservation's destination
    WrongPlace,
    /// TTL elapsed; the hold was released before responding
    Expired,
}

impl ConfirmOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmOutcome::Confirmed => "CONFIRMED",
            ConfirmOutcome::Invalid => "INVALID",
            ConfirmOutcome::AlreadyConfirmed => "ALREADY_CONFIRMED",
            ConfirmOutcome::WrongPlace => "WRONG_PLACE",
            ConfirmOutcome::Expired => "EXPIRED",
        }
    }
}

pub struct ReservationManager {
    registry: Arc<PlaceRegistry>,
    reservations: Mutex<FxHashMap<String, Reservation>>,
    ttl_secs: i64,
}

impl ReservationManager {
    pub fn new(registry: Arc<PlaceRegistry>, ttl_secs: u64) -> Self {
        Self {
            registry,
            reservations: Mutex::new(FxHashMap::default()),
            ttl_secs: ttl_secs as i64,
        }
    }

    /// Offer a redirect from `from_place` to `to_place`. Holds a slot at
    /// the destination first; returns None when the destination is full
    /// (no reservation created, no partial state).
    pub fn create(&self, from_place: &str, to_place: &str) -> Option<Reservation> {
        let held = match self.registry.hold(to_place) {
            Admission::Full(occ) => {
                debug!(to_place = %to_place, count = %occ.count, "redirect_hold_rejected");
                return None;
            }
            Admission::Admitted(occ) => occ,
        };

        let now = Utc::now();
        let reservation = Reservation {
            token: new_token(),
            from_place: from_place.to_string(),
            to_place: to_place.to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(self.ttl_secs),
            confirmed: false,
        };
        self.reservations.lock().insert(reservation.token.clone(), reservation.clone());
        info!(
            token = %reservation.token,
            from_place = %from_place,
            to_place = %to_place,
            held_count = %held.count,
            expires_at = %reservation.expires_at,
            "reservation_created"
        );
        Some(reservation)
    }

    /// Present a token at a gate. Expiry is checked lazily here; an
    /// expired token releases its hold before responding.
    pub fn confirm(&self, token: &str, place_id: &str) -> ConfirmOutcome {
        let mut map = self.reservations.lock();
        let Some(reservation) = map.get_mut(token) else {
            return ConfirmOutcome::Invalid;
        };
        if reservation.confirmed {
            return ConfirmOutcome::AlreadyConfirmed;
        }
        if reservation.to_place != place_id {
            return ConfirmOutcome::WrongPlace;
        }
        if reservation.is_expired(Utc::now()) {
            let to_place = reservation.to_place.clone();
            map.remove(token);
            let occ = self.registry.release(&to_place);
            info!(token = %token, to_place = %to_place, count = %occ.count, "reservation_expired");
            return ConfirmOutcome::Expired;
        }

        // The held unit is NOT released: it converts into a permanent
        // entry. Capacity was already claimed at creation time.
        reservation.confirmed = true;
        info!(token = %token, to_place = %place_id, "reservation_confirmed");
        ConfirmOutcome::Confirmed
    }

    /// Release holds for every lapsed unconfirmed reservation and drop the
    /// records. Confirmed records past their expiry are retired without a
    /// release (their hold became a permanent entry). Returns the released
    /// reservations so callers can notify dashboards of the count changes.
    pub fn sweep_expired(&self) -> Vec<Reservation> {
        let now = Utc::now();
        let mut map = self.reservations.lock();
        let lapsed: Vec<String> = map
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.token.clone())
            .collect();

        let mut released = Vec::new();
        for token in lapsed {
            let Some(reservation) = map.remove(&token) else { continue };
            if reservation.confirmed {
                debug!(token = %token, "confirmed_reservation_retired");
                continue;
            }
            let occ = self.registry.release(&reservation.to_place);
            info!(
                token = %token,
                to_place = %reservation.to_place,
                count = %occ.count,
                "reservation_expired"
            );
            released.push(reservation);
        }
        released
    }

    /// Active reservations ascending by expiry. Sweeps first so the list
    /// never shows stale entries.
    pub fn list_active(&self) -> Vec<Reservation> {
        self.sweep_expired();
        let map = self.reservations.lock();
        let mut active: Vec<Reservation> =
            map.values().filter(|r| !r.confirmed).cloned().collect();
        active.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        active
    }

    /// Look up a reservation by token (read-only, for tests/diagnostics)
    pub fn get(&self, token: &str) -> Option<Reservation> {
        self.reservations.lock().get(token).cloned()
    }
}
