//! WebSocket transport for live occupancy updates
//!
//! Dashboards connect to `ws://host:port/ws/{place_id}` and receive a JSON
//! `PlaceUpdate` frame whenever that place's occupancy changes. No
//! client-to-server payload is expected beyond the handshake and
//! keepalives; client frames other than Close are ignored.

use crate::infra::metrics::Metrics;
use crate::io::updates::UpdateHub;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info};

/// Start the WebSocket live-update server
pub async fn start_ws_server(
    hub: Arc<UpdateHub>,
    metrics: Arc<Metrics>,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %port, "ws_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let hub = hub.clone();
                        let metrics = metrics.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_socket(stream, peer, hub, metrics, shutdown).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "ws_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("ws_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_socket(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<UpdateHub>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Capture the request path during the handshake
    let mut path = String::new();
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = req.uri().path().to_string();
        Ok(response)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(peer = %peer, error = %e, "ws_handshake_failed");
            return;
        }
    };

    let Some(place_id) = path.strip_prefix("/ws/").filter(|p| !p.is_empty()) else {
        debug!(peer = %peer, path = %path, "ws_unknown_path");
        return;
    };
    let place_id = place_id.to_string();

    let (subscriber_id, mut updates) = hub.subscribe(&place_id);
    metrics.ws_connected();
    info!(peer = %peer, place_id = %place_id, "ws_subscriber_connected");

    let (mut sink, mut source) = ws.split();
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                let Ok(frame) = serde_json::to_string(&update) else { continue };
                if sink.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Keepalive or stray client payload: nothing to do
                    // (tungstenite answers pings automatically)
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(peer = %peer, error = %e, "ws_read_error");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    hub.unsubscribe(&place_id, subscriber_id);
    metrics.ws_disconnected();
    debug!(peer = %peer, place_id = %place_id, "ws_subscriber_disconnected");
}
