//! Event orchestration
//!
//! The dispatcher processes one inbound gate event end-to-end as a single
//! logical unit of work: duplicate check, occupancy update, overflow
//! handling, logging, notification. It owns no state of its own; the
//! collaborators do, each behind its own guard.

use crate::domain::types::{
    EventKind, GateEvent, Occupancy, PlaceState, VisitEvent,
};
use crate::infra::metrics::Metrics;
use crate::io::updates::{PlaceUpdate, UpdateHub};
use crate::services::event_log::{ClaimOutcome, EventLog, RecordOutcome};
use crate::services::registry::{Admission, PlaceRegistry};
use crate::services::reservations::ReservationManager;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Final status of one processed gate event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Ok,
    Full,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Ok => "OK",
            EventStatus::Full => "FULL",
        }
    }
}

/// Everything the transport needs to answer a submitted gate event
#[derive(Debug, Clone)]
pub struct EventOutcome {
    pub status: EventStatus,
    pub place_id: String,
    pub current_count: u32,
    pub state: PlaceState,
    pub redirect_to: Option<String>,
    pub token: Option<String>,
    pub message: &'static str,
}

pub struct EventDispatcher {
    registry: Arc<PlaceRegistry>,
    log: Arc<EventLog>,
    reservations: Arc<ReservationManager>,
    hub: Arc<UpdateHub>,
    metrics: Arc<Metrics>,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<PlaceRegistry>,
        log: Arc<EventLog>,
        reservations: Arc<ReservationManager>,
        hub: Arc<UpdateHub>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { registry, log, reservations, hub, metrics }
    }

    /// Process one gate event end-to-end. The overall effect is atomic per
    /// place: the id claim decides idempotency races before any counter is
    /// touched, and each counter mutation is a single guarded operation.
    pub async fn handle_event(&self, event: GateEvent) -> EventOutcome {
        self.metrics.record_event();

        if let Some(external_id) = event.external_id.as_deref() {
            match self.log.claim(external_id) {
                ClaimOutcome::Claimed => {}
                ClaimOutcome::Duplicate(prior) => {
                    self.metrics.record_duplicate();
                    return self.duplicate_outcome(external_id, &event.place_id, prior).await;
                }
            }
        }

        self.registry.get_or_create(&event.place_id);
        let time = event.time.unwrap_or_else(Utc::now);

        let occupancy = match event.kind {
            EventKind::Exit => {
                self.metrics.record_exit();
                self.registry.exit(&event.place_id)
            }
            EventKind::Enter => match self.registry.try_enter(&event.place_id) {
                Admission::Admitted(occ) => {
                    self.metrics.record_enter_admitted();
                    occ
                }
                Admission::Full(occ) => {
                    // The visitor did not enter: no VisitEvent, and the id
                    // claim is dropped so a retry is re-processed.
                    if let Some(external_id) = event.external_id.as_deref() {
                        self.log.release_claim(external_id);
                    }
                    self.metrics.record_full_rejection();
                    return self.offer_redirect(&event.place_id, occ);
                }
            },
        };

        match self.log.record(
            &event.place_id,
            event.kind,
            event.external_id.as_deref(),
            time,
            occupancy.count,
        ) {
            RecordOutcome::Recorded => {}
            RecordOutcome::Duplicate(prior) => {
                // Unreachable while the claim protocol is honored; treat
                // the winner's record as authoritative regardless.
                warn!(place_id = %event.place_id, "duplicate_record_after_claim");
                self.metrics.record_duplicate();
                return Self::outcome_from_prior(&prior, occupancy.capacity);
            }
        }

        info!(
            place_id = %event.place_id,
            event = %event.kind.as_str(),
            count = %occupancy.count,
            state = %occupancy.state().as_str(),
            "event_registered"
        );

        self.publish_count_change(&event.place_id, occupancy);

        EventOutcome {
            status: EventStatus::Ok,
            place_id: event.place_id,
            current_count: occupancy.count,
            state: occupancy.state(),
            redirect_to: None,
            token: None,
            message: "Event registered",
        }
    }

    /// Release expired holds and push the resulting count changes to
    /// dashboards. Returns how many reservations were released.
    pub fn sweep_expired_and_notify(&self) -> usize {
        let released = self.reservations.sweep_expired();
        for reservation in &released {
            self.metrics.record_reservation_expired();
            let snapshot = self.registry.snapshot(&reservation.to_place);
            self.hub.publish(PlaceUpdate::from_snapshot(&snapshot, None));
        }
        released.len()
    }

    /// Push a place's current snapshot to its subscribers. Used when a
    /// count change happens outside the event path (a lazy expiry during
    /// confirmation).
    pub fn publish_snapshot(&self, place_id: &str) {
        let snapshot = self.registry.snapshot(place_id);
        self.hub.publish(PlaceUpdate::from_snapshot(&snapshot, None));
    }

    /// The requested place is full: walk the alternatives in order and
    /// offer a reservation at the first one that still has a slot. A
    /// candidate can fill between selection and hold; the next one is
    /// tried.
    fn offer_redirect(&self, source: &str, occupancy: Occupancy) -> EventOutcome {
        for candidate in self.registry.alternatives(source) {
            let Some(reservation) = self.reservations.create(source, &candidate) else {
                continue;
            };
            self.metrics.record_redirect_offered();

            // The destination's occupancy changed by the hold
            let snapshot = self.registry.snapshot(&candidate);
            self.hub
                .publish(PlaceUpdate::from_snapshot(&snapshot, Some(source.to_string())));

            return EventOutcome {
                status: EventStatus::Full,
                place_id: source.to_string(),
                current_count: occupancy.count,
                state: occupancy.state(),
                redirect_to: Some(candidate),
                token: Some(reservation.token),
                message: "Capacity reached, redirect offered",
            };
        }

        debug!(place_id = %source, "no_alternative_available");
        EventOutcome {
            status: EventStatus::Full,
            place_id: source.to_string(),
            current_count: occupancy.count,
            state: occupancy.state(),
            redirect_to: None,
            token: None,
            message: "Capacity reached",
        }
    }

    /// A duplicate submission returns the winner's result. When the winner
    /// is still in flight, yield briefly for its record; failing that,
    /// answer from the live snapshot.
    async fn duplicate_outcome(
        &self,
        external_id: &str,
        place_id: &str,
        prior: Option<VisitEvent>,
    ) -> EventOutcome {
        if let Some(prior) = prior {
            let capacity = self.registry.snapshot(&prior.place_id).capacity;
            return Self::outcome_from_prior(&prior, capacity);
        }

        for _ in 0..32 {
            tokio::task::yield_now().await;
            if let Some(prior) = self.log.find(external_id) {
                let capacity = self.registry.snapshot(&prior.place_id).capacity;
                return Self::outcome_from_prior(&prior, capacity);
            }
        }

        debug!(external_id = %external_id, "duplicate_winner_still_in_flight");
        let snapshot = self.registry.snapshot(place_id);
        EventOutcome {
            status: EventStatus::Ok,
            place_id: snapshot.place_id,
            current_count: snapshot.current_count,
            state: snapshot.state,
            redirect_to: None,
            token: None,
            message: "duplicate ignored",
        }
    }

    fn outcome_from_prior(prior: &VisitEvent, capacity: u32) -> EventOutcome {
        let occupancy = Occupancy { count: prior.resulting_count, capacity };
        EventOutcome {
            status: EventStatus::Ok,
            place_id: prior.place_id.clone(),
            current_count: prior.resulting_count,
            state: occupancy.state(),
            redirect_to: None,
            token: None,
            message: "duplicate ignored",
        }
    }

    fn publish_count_change(&self, place_id: &str, occupancy: Occupancy) {
        self.hub.publish(PlaceUpdate {
            place_id: place_id.to_string(),
            current_count: occupancy.count,
            state: occupancy.state(),
            redirect_hint: None,
            ts: crate::domain::types::epoch_ms(),
        });
    }
}
