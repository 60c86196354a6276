//! Smart Queue backend - live occupancy tracking with redirect reservations
//!
//! Tracks gate-sensor enter/exit events per place, enforces capacity
//! limits, offers time-boxed reservations at an alternative place when one
//! is full, and pushes occupancy changes to dashboards over WebSocket.
//!
//! Module structure:
//! - `domain/` - Core business types (events, places, reservations)
//! - `services/` - Business logic (Registry, EventLog, Reservations, Dispatcher)
//! - `io/` - Transport edges (HTTP API, WebSocket, update hub)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use smart_queue::infra::{Config, Metrics};
use smart_queue::io::{start_http_server, start_ws_server, ApiContext, UpdateHub};
use smart_queue::services::{EventDispatcher, EventLog, PlaceRegistry, ReservationManager};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Smart Queue backend - occupancy tracking and redirect reservations
#[derive(Parser, Debug)]
#[command(name = "smart-queue", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("smart-queue starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        http_port = %config.http_port(),
        ws_port = %config.ws_port(),
        default_capacity = %config.default_capacity(),
        reservation_ttl_secs = %config.reservation_ttl_secs(),
        sweep_interval_secs = %config.sweep_interval_secs(),
        configured_places = %config.places().len(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(PlaceRegistry::with_places(
        config.default_capacity(),
        config.places().clone(),
    ));
    let log = Arc::new(EventLog::new());
    let reservations = Arc::new(ReservationManager::new(
        registry.clone(),
        config.reservation_ttl_secs(),
    ));
    let hub = Arc::new(UpdateHub::new(config.update_buffer()));
    let dispatcher = Arc::new(EventDispatcher::new(
        registry.clone(),
        log.clone(),
        reservations.clone(),
        hub.clone(),
        metrics.clone(),
    ));

    // Proactive reservation expiry sweep
    let sweep_dispatcher = dispatcher.clone();
    let sweep_secs = config.sweep_interval_secs().max(1);
    let mut sweep_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(sweep_secs));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let released = sweep_dispatcher.sweep_expired_and_notify();
                    if released > 0 {
                        info!(released = %released, "expired_reservations_swept");
                    }
                }
                _ = sweep_shutdown.changed() => {
                    if *sweep_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    // Start WebSocket live-update server
    let ws_hub = hub.clone();
    let ws_metrics = metrics.clone();
    let ws_port = config.ws_port();
    let ws_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_ws_server(ws_hub, ws_metrics, ws_port, ws_shutdown).await {
            tracing::error!(error = %e, "WebSocket server error");
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run the HTTP API in the main task until shutdown
    let ctx = Arc::new(ApiContext {
        site_id: config.site_id().to_string(),
        api_key: config.api_key().to_string(),
        dispatcher,
        registry,
        log,
        reservations,
        metrics,
    });
    start_http_server(ctx, config.http_port(), shutdown_rx).await?;

    info!("smart-queue shutdown complete");
    Ok(())
}
