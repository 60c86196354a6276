//! HTTP API
//!
//! Exposes the gate event, reservation and query endpoints over hyper.
//! Every mutating/read endpoint except the root, health and metrics
//! requires the pre-shared X-API-KEY credential; a missing or invalid key
//! is rejected before any side effect runs. FULL is a normal response,
//! never an HTTP error.

use crate::domain::types::{EventKind, GateEvent};
use crate::infra::metrics::Metrics;
use crate::services::dispatcher::{EventDispatcher, EventOutcome};
use crate::services::event_log::EventLog;
use crate::services::registry::PlaceRegistry;
use crate::services::reservations::{ConfirmOutcome, ReservationManager};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

const API_KEY_HEADER: &str = "x-api-key";
const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Shared handles for the request handlers
pub struct ApiContext {
    pub site_id: String,
    pub api_key: String,
    pub dispatcher: Arc<EventDispatcher>,
    pub registry: Arc<PlaceRegistry>,
    pub log: Arc<EventLog>,
    pub reservations: Arc<ReservationManager>,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Deserialize)]
struct EventIn {
    place_id: String,
    event: String,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct EventResponse<'a> {
    status: &'static str,
    place_id: &'a str,
    current_count: u32,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_to: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    message: &'static str,
}

impl<'a> EventResponse<'a> {
    fn from_outcome(outcome: &'a EventOutcome) -> Self {
        Self {
            status: outcome.status.as_str(),
            place_id: &outcome.place_id,
            current_count: outcome.current_count,
            state: outcome.state.as_str(),
            redirect_to: outcome.redirect_to.as_deref(),
            token: outcome.token.as_deref(),
            message: outcome.message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfirmIn {
    token: String,
    place_id: String,
}

#[derive(Debug, Serialize)]
struct ConfirmResponse<'a> {
    status: &'static str,
    place_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ReservationOut<'a> {
    token: &'a str,
    from_place: &'a str,
    to_place: &'a str,
    expires_at: DateTime<Utc>,
    confirmed: bool,
}

#[derive(Debug, Serialize)]
struct HistoryEventOut {
    event: &'static str,
    time: DateTime<Utc>,
    resulting_count: u32,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn bad_request(message: &str) -> Response<Full<Bytes>> {
    json_response(StatusCode::BAD_REQUEST, &ErrorBody { error: message })
}

fn forbidden() -> Response<Full<Bytes>> {
    json_response(StatusCode::FORBIDDEN, &ErrorBody { error: "forbidden" })
}

fn not_found() -> Response<Full<Bytes>> {
    json_response(StatusCode::NOT_FOUND, &ErrorBody { error: "not found" })
}

fn authorized(headers: &HeaderMap, ctx: &ApiContext) -> bool {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == ctx.api_key)
        .unwrap_or(false)
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<Incoming>,
    ctx: Arc<ApiContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/") => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "status": "OK",
                "service": "smart-queue",
                "version": env!("CARGO_PKG_VERSION"),
                "build": env!("GIT_HASH"),
            }),
        ),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        (&Method::GET, "/metrics") => {
            let body = ctx.metrics.render_prometheus(&ctx.site_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        // CORS preflight for the dashboard
        (&Method::OPTIONS, _) => Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type, X-API-KEY")
            .body(Full::new(Bytes::from("")))
            .expect("static response should not fail"),
        (&Method::POST, "/event") => submit_event(req, &ctx).await,
        (&Method::POST, "/confirm") => confirm_reservation(req, &ctx).await,
        (&Method::GET, "/reservations") => list_reservations(&req, &ctx),
        (&Method::GET, _) if path.starts_with("/places/") => {
            place_routes(&req, &ctx, &path, query.as_deref())
        }
        _ => not_found(),
    };
    Ok(response)
}

async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<Incoming>,
) -> Result<T, Response<Full<Bytes>>> {
    let bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return Err(bad_request(&format!("unreadable body: {e}"))),
    };
    serde_json::from_slice(&bytes).map_err(|e| bad_request(&format!("invalid json: {e}")))
}

async fn submit_event(req: Request<Incoming>, ctx: &ApiContext) -> Response<Full<Bytes>> {
    if !authorized(req.headers(), ctx) {
        ctx.metrics.record_auth_failure();
        return forbidden();
    }
    let input: EventIn = match read_json(req).await {
        Ok(input) => input,
        Err(response) => return response,
    };
    let kind: EventKind = match input.event.parse() {
        Ok(kind) => kind,
        Err(e) => return bad_request(&e.to_string()),
    };
    if input.place_id.trim().is_empty() {
        return bad_request("place_id must not be empty");
    }

    let outcome = ctx
        .dispatcher
        .handle_event(GateEvent {
            place_id: input.place_id,
            kind,
            external_id: input.event_id,
            time: input.time,
        })
        .await;
    json_response(StatusCode::OK, &EventResponse::from_outcome(&outcome))
}

async fn confirm_reservation(req: Request<Incoming>, ctx: &ApiContext) -> Response<Full<Bytes>> {
    if !authorized(req.headers(), ctx) {
        ctx.metrics.record_auth_failure();
        return forbidden();
    }
    let input: ConfirmIn = match read_json(req).await {
        Ok(input) => input,
        Err(response) => return response,
    };
    if input.token.trim().is_empty() || input.place_id.trim().is_empty() {
        return bad_request("token and place_id must not be empty");
    }

    let outcome = ctx.reservations.confirm(&input.token, &input.place_id);
    let status = match outcome {
        ConfirmOutcome::Confirmed => {
            ctx.metrics.record_reservation_confirmed();
            StatusCode::OK
        }
        ConfirmOutcome::Invalid => {
            ctx.metrics.record_confirm_rejected();
            StatusCode::NOT_FOUND
        }
        ConfirmOutcome::AlreadyConfirmed | ConfirmOutcome::WrongPlace => {
            ctx.metrics.record_confirm_rejected();
            StatusCode::CONFLICT
        }
        ConfirmOutcome::Expired => {
            // The hold was released: dashboards see the count change
            ctx.metrics.record_reservation_expired();
            ctx.dispatcher.publish_snapshot(&input.place_id);
            StatusCode::GONE
        }
    };
    json_response(
        status,
        &ConfirmResponse { status: outcome.as_str(), place_id: &input.place_id },
    )
}

fn list_reservations(req: &Request<Incoming>, ctx: &ApiContext) -> Response<Full<Bytes>> {
    if !authorized(req.headers(), ctx) {
        ctx.metrics.record_auth_failure();
        return forbidden();
    }
    ctx.dispatcher.sweep_expired_and_notify();
    let active = ctx.reservations.list_active();
    let out: Vec<ReservationOut<'_>> = active
        .iter()
        .map(|r| ReservationOut {
            token: &r.token,
            from_place: &r.from_place,
            to_place: &r.to_place,
            expires_at: r.expires_at,
            confirmed: r.confirmed,
        })
        .collect();
    json_response(StatusCode::OK, &out)
}

fn place_routes(
    req: &Request<Incoming>,
    ctx: &ApiContext,
    path: &str,
    query: Option<&str>,
) -> Response<Full<Bytes>> {
    if !authorized(req.headers(), ctx) {
        ctx.metrics.record_auth_failure();
        return forbidden();
    }
    let rest = &path["/places/".len()..];
    let mut segments = rest.splitn(2, '/');
    let place_id = segments.next().unwrap_or("");
    if place_id.is_empty() {
        return not_found();
    }

    match segments.next() {
        // Status query counts as first reference: creates the place
        None => json_response(StatusCode::OK, &ctx.registry.snapshot(place_id)),
        Some("events") => {
            let page = query_param(query, "page")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            let page_size = query_param(query, "page_size")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE);
            let events = ctx.log.query(place_id, page, page_size);
            let out: Vec<HistoryEventOut> = events
                .iter()
                .map(|e| HistoryEventOut {
                    event: e.kind.as_str(),
                    time: e.time,
                    resulting_count: e.resulting_count,
                })
                .collect();
            json_response(StatusCode::OK, &out)
        }
        Some(_) => not_found(),
    }
}

/// Start the HTTP API server
pub async fn start_http_server(
    ctx: Arc<ApiContext>,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %port, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let ctx = ctx.clone();
                                async move { handle_request(req, ctx).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_parsing() {
        assert_eq!(query_param(Some("page=2&page_size=10"), "page").as_deref(), Some("2"));
        assert_eq!(
            query_param(Some("page=2&page_size=10"), "page_size").as_deref(),
            Some("10")
        );
        assert_eq!(query_param(Some("page=2"), "page_size"), None);
        assert_eq!(query_param(None, "page"), None);
        assert_eq!(query_param(Some("broken"), "page"), None);
    }

    #[test]
    fn test_event_response_shape() {
        let outcome = EventOutcome {
            status: crate::services::dispatcher::EventStatus::Full,
            place_id: "hall_1".to_string(),
            current_count: 2,
            state: crate::domain::types::PlaceState::Full,
            redirect_to: Some("hall_2".to_string()),
            token: Some("tok".to_string()),
            message: "Capacity reached, redirect offered",
        };
        let value = serde_json::to_value(EventResponse::from_outcome(&outcome)).unwrap();
        assert_eq!(value["status"], "FULL");
        assert_eq!(value["state"], "FULL");
        assert_eq!(value["redirect_to"], "hall_2");
        assert_eq!(value["token"], "tok");

        let outcome = EventOutcome { redirect_to: None, token: None, ..outcome };
        let value = serde_json::to_value(EventResponse::from_outcome(&outcome)).unwrap();
        assert!(value.get("redirect_to").is_none());
        assert!(value.get("token").is_none());
    }
}
