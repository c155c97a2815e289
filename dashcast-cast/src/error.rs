//! Cast error types

use dashcast_core::TimeoutError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CastError {
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("Connecting to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("Launching receiver application {app_id} failed: {reason}")]
    Launch { app_id: String, reason: String },

    #[error("Status request failed: {0}")]
    Status(String),

    #[error("Loading media failed: {0}")]
    Load(String),

    #[error("Stopping playback failed: {0}")]
    Stop(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl CastError {
    /// Control-plane setup failures abort supervision until rediscovery
    #[must_use]
    pub const fn is_setup_failure(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Launch { .. })
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Reclassify any failure while opening a connection as a connect failure
    pub(crate) fn into_connect(self, host: &str) -> Self {
        match self {
            Self::Connect { .. } => self,
            other => Self::Connect {
                host: host.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Reclassify any failure while launching as a launch failure
    pub(crate) fn into_launch(self, app_id: &str) -> Self {
        match self {
            Self::Launch { .. } => self,
            other => Self::Launch {
                app_id: app_id.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for CastError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
