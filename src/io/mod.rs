//! IO modules - transport interfaces
//!
//! This module contains the transport edges of the service:
//! - `http` - HTTP API (gate events, reservations, queries, metrics)
//! - `ws` - WebSocket live-update transport
//! - `updates` - per-place subscriber hub and update payload contract

pub mod http;
pub mod updates;
pub mod ws;

// Re-export commonly used types
pub use http::{start_http_server, ApiContext};
pub use updates::{PlaceUpdate, UpdateHub};
pub use ws::start_ws_server;
