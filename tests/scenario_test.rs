//! End-to-end scenarios driven through the public library API
//!
//! Exercises the dispatcher, registry, event log, reservation manager and
//! update hub together, the way the HTTP layer does, without sockets.

use smart_queue::domain::types::{EventKind, GateEvent, PlaceState};
use smart_queue::infra::Metrics;
use smart_queue::io::UpdateHub;
use smart_queue::services::{
    ConfirmOutcome, EventDispatcher, EventLog, EventStatus, PlaceRegistry, ReservationManager,
};
use std::sync::Arc;

struct Service {
    registry: Arc<PlaceRegistry>,
    log: Arc<EventLog>,
    reservations: Arc<ReservationManager>,
    hub: Arc<UpdateHub>,
    dispatcher: Arc<EventDispatcher>,
}

fn service(ttl_secs: u64, places: &[(&str, u32)]) -> Service {
    let registry = Arc::new(PlaceRegistry::with_places(
        10,
        places.iter().map(|(id, cap)| (id.to_string(), *cap)),
    ));
    let log = Arc::new(EventLog::new());
    let reservations = Arc::new(ReservationManager::new(registry.clone(), ttl_secs));
    let hub = Arc::new(UpdateHub::new(32));
    let dispatcher = Arc::new(EventDispatcher::new(
        registry.clone(),
        log.clone(),
        reservations.clone(),
        hub.clone(),
        Arc::new(Metrics::new()),
    ));
    Service { registry, log, reservations, hub, dispatcher }
}

fn gate_event(place_id: &str, kind: EventKind, external_id: Option<&str>) -> GateEvent {
    GateEvent {
        place_id: place_id.to_string(),
        kind,
        external_id: external_id.map(str::to_string),
        time: None,
    }
}

#[tokio::test]
async fn test_full_redirect_confirm_flow() {
    let s = service(120, &[("hall_1", 2), ("hall_2", 5)]);

    let outcome = s.dispatcher.handle_event(gate_event("hall_1", EventKind::Enter, None)).await;
    assert_eq!(outcome.status, EventStatus::Ok);
    assert_eq!(outcome.current_count, 1);

    let outcome = s.dispatcher.handle_event(gate_event("hall_1", EventKind::Enter, None)).await;
    assert_eq!(outcome.status, EventStatus::Ok);
    assert_eq!(outcome.current_count, 2);
    assert_eq!(outcome.state, PlaceState::Full);

    // Third visitor: redirected to hall_2 with a token, hold takes a slot
    let outcome = s.dispatcher.handle_event(gate_event("hall_1", EventKind::Enter, None)).await;
    assert_eq!(outcome.status, EventStatus::Full);
    assert_eq!(outcome.current_count, 2);
    assert_eq!(outcome.redirect_to.as_deref(), Some("hall_2"));
    let token = outcome.token.expect("redirect carries a token");
    assert_eq!(s.registry.snapshot("hall_2").current_count, 1);

    // Confirming converts the hold; the count does not move
    assert_eq!(s.reservations.confirm(&token, "hall_2"), ConfirmOutcome::Confirmed);
    assert_eq!(s.registry.snapshot("hall_2").current_count, 1);
    assert_eq!(s.reservations.confirm(&token, "hall_2"), ConfirmOutcome::AlreadyConfirmed);

    // Only the two admitted enters were logged
    assert_eq!(s.log.len(), 2);
}

#[tokio::test]
async fn test_unconfirmed_redirect_expires_and_releases() {
    let s = service(0, &[("hall_1", 1), ("hall_2", 3)]);
    s.dispatcher.handle_event(gate_event("hall_1", EventKind::Enter, None)).await;

    let outcome = s.dispatcher.handle_event(gate_event("hall_1", EventKind::Enter, None)).await;
    assert_eq!(outcome.status, EventStatus::Full);
    assert!(outcome.token.is_some());
    assert_eq!(s.registry.snapshot("hall_2").current_count, 1);

    // TTL 0: the sweep releases the hold and dashboards hear about it
    let (_, mut rx) = s.hub.subscribe("hall_2");
    assert_eq!(s.dispatcher.sweep_expired_and_notify(), 1);
    assert_eq!(s.registry.snapshot("hall_2").current_count, 0);
    let update = rx.recv().await.unwrap();
    assert_eq!(update.place_id, "hall_2");
    assert_eq!(update.current_count, 0);

    // The expired token is gone
    let token = outcome.token.unwrap();
    assert_eq!(s.reservations.confirm(&token, "hall_2"), ConfirmOutcome::Invalid);
}

#[tokio::test]
async fn test_duplicate_event_ids_processed_once() {
    let s = service(120, &[("hall_1", 5)]);

    let first = s
        .dispatcher
        .handle_event(gate_event("hall_1", EventKind::Enter, Some("sensor-7:42")))
        .await;
    assert_eq!(first.current_count, 1);

    for _ in 0..3 {
        let repeat = s
            .dispatcher
            .handle_event(gate_event("hall_1", EventKind::Enter, Some("sensor-7:42")))
            .await;
        assert_eq!(repeat.status, EventStatus::Ok);
        assert_eq!(repeat.current_count, 1);
        assert_eq!(repeat.message, "duplicate ignored");
    }

    assert_eq!(s.registry.snapshot("hall_1").current_count, 1);
    assert_eq!(s.log.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_submissions_increment_once() {
    let s = service(120, &[("hall_1", 100)]);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let dispatcher = s.dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher
                .handle_event(gate_event("hall_1", EventKind::Enter, Some("burst-1")))
                .await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.status, EventStatus::Ok);
    }

    // One winner mutated the counter, everyone answered its count
    assert_eq!(s.registry.snapshot("hall_1").current_count, 1);
    assert_eq!(s.log.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enters_never_oversubscribe() {
    let s = service(120, &[("hall_1", 10)]);

    let mut handles = Vec::new();
    for i in 0..40 {
        let dispatcher = s.dispatcher.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("ev-{i}");
            dispatcher
                .handle_event(gate_event("hall_1", EventKind::Enter, Some(&id)))
                .await
        }));
    }

    let mut admitted = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap().status {
            EventStatus::Ok => admitted += 1,
            EventStatus::Full => full += 1,
        }
    }

    assert_eq!(admitted, 10);
    assert_eq!(full, 30);
    let snapshot = s.registry.snapshot("hall_1");
    assert_eq!(snapshot.current_count, 10);
    assert_eq!(snapshot.state, PlaceState::Full);
}

#[tokio::test]
async fn test_history_query_is_newest_first() {
    let s = service(120, &[("hall_1", 10)]);
    for _ in 0..3 {
        s.dispatcher.handle_event(gate_event("hall_1", EventKind::Enter, None)).await;
    }
    s.dispatcher.handle_event(gate_event("hall_1", EventKind::Exit, None)).await;

    let events = s.log.query("hall_1", 0, 10);
    assert_eq!(events.len(), 4);
    assert_eq!(events[0].kind, EventKind::Exit);
    assert_eq!(events[0].resulting_count, 2);
    assert_eq!(events[3].resulting_count, 1);
}

#[tokio::test]
async fn test_active_reservations_listed_by_expiry() {
    let s = service(120, &[("hall_1", 1), ("hall_2", 5)]);
    s.dispatcher.handle_event(gate_event("hall_1", EventKind::Enter, None)).await;

    let first = s.dispatcher.handle_event(gate_event("hall_1", EventKind::Enter, None)).await;
    let second = s.dispatcher.handle_event(gate_event("hall_1", EventKind::Enter, None)).await;

    let active = s.reservations.list_active();
    assert_eq!(active.len(), 2);
    assert!(active[0].expires_at <= active[1].expires_at);
    let tokens: Vec<&str> = active.iter().map(|r| r.token.as_str()).collect();
    assert!(tokens.contains(&first.token.as_deref().unwrap()));
    assert!(tokens.contains(&second.token.as_deref().unwrap()));
    assert!(active.iter().all(|r| !r.confirmed));
}
