//! HTTP surface for DashCast
//!
//! Serves the signaling WebSocket, the status and health endpoints, and the
//! receiver application assets.

pub mod http;
pub mod net;

pub use http::{create_router, AppState};
