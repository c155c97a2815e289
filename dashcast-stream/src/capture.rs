//! Capture provider interface
//!
//! A [`CaptureBackend`] launches a browser session; the resulting
//! [`CaptureProvider`] opens one page per screen and starts capturing it
//! into a signaling room. Deadlines are applied by the caller.

use async_trait::async_trait;
use dashcast_core::config::ScreenConfig;
use dashcast_core::RoomId;
use dashcast_relay::SignalingRelay;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::CaptureError;

/// A page opened by a capture provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn CaptureProvider>, CaptureError>;
}

#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Open a page for `screen` with its cookies applied and navigate to it
    async fn open_target(&self, screen: &ScreenConfig) -> Result<TargetId, CaptureError>;

    /// Start streaming `target` into `room`. Fails with `NoTarget` when the page is gone.
    async fn start_capture(&self, target: &TargetId, room: &RoomId, zoom: f64) -> Result<(), CaptureError>;

    async fn close_target(&self, target: &TargetId);

    /// Resolves once the browser session has gone away
    async fn closed(&self);

    async fn shutdown(&self);
}

/// Carries heartbeat probes to a stream's broadcaster
#[cfg_attr(test, mockall::automock)]
pub trait PingTransport: Send + Sync {
    /// Returns whether the probe was handed to a broadcaster
    fn ping(&self, room: &RoomId) -> bool;
}

impl PingTransport for SignalingRelay {
    fn ping(&self, room: &RoomId) -> bool {
        Self::ping(self, room)
    }
}
