//! Capture sessions and stream liveness
//!
//! The [`ScreenSessionManager`] keeps a browser session alive with one page
//! per configured screen. Each page is captured into the room named after
//! its screen and watched by a [`StreamWatchdog`] that heartbeats the
//! capture through the signaling relay and restarts it on silence.

pub mod capture;
pub mod error;
pub mod http;
pub mod session;
pub mod table;
pub mod watchdog;

#[cfg(test)]
mod testing;

pub use capture::{CaptureBackend, CaptureProvider, PingTransport, TargetId};
pub use error::CaptureError;
pub use http::{HttpCaptureBackend, HttpCaptureProvider};
pub use session::ScreenSessionManager;
pub use table::{Liveness, StreamRecord, StreamTable};
pub use watchdog::{StreamWatchdog, WatchdogSettings};
