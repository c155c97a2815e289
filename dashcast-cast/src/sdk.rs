//! Cast control-plane interface
//!
//! A [`CastConnector`] opens control connections to receivers. A connection
//! launches the receiver application, which yields a [`ReceiverSession`] for
//! media control. Implementations need not enforce deadlines themselves; the
//! supervisor wraps every call in the timeout guard and drops calls that lose.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CastError;

#[async_trait]
pub trait CastConnector: Send + Sync {
    async fn connect(&self, host: &str) -> Result<Box<dyn CastConnection>, CastError>;
}

#[async_trait]
pub trait CastConnection: Send + Sync {
    /// Launch (or join) the receiver application
    async fn launch(&self, app_id: &str) -> Result<Box<dyn ReceiverSession>, CastError>;

    async fn receiver_status(&self) -> Result<ReceiverStatus, CastError>;

    /// Resolves with the first connection-level error, pending while healthy
    async fn fault(&self) -> CastError;

    async fn close(&self);
}

#[async_trait]
pub trait ReceiverSession: Send + Sync {
    async fn player_status(&self) -> Result<PlayerStatus, CastError>;

    async fn load(&self, media: &MediaDescriptor) -> Result<PlayerStatus, CastError>;

    async fn stop(&self) -> Result<(), CastError>;
}

/// Applications currently running on a receiver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverStatus {
    #[serde(default)]
    pub applications: Vec<ApplicationStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    pub app_id: String,
    #[serde(default)]
    pub is_idle_screen: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ReceiverStatus {
    /// Whether `app_id` is the application in the foreground
    #[must_use]
    pub fn is_running(&self, app_id: &str) -> bool {
        self.applications
            .iter()
            .any(|app| app.app_id == app_id && !app.is_idle_screen)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    Buffering,
    #[serde(other)]
    Unknown,
}

impl PlayerState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Playing => "PLAYING",
            Self::Paused => "PAUSED",
            Self::Buffering => "BUFFERING",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatus {
    pub player_state: PlayerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
}

impl PlayerStatus {
    #[must_use]
    pub const fn new(player_state: PlayerState) -> Self {
        Self {
            player_state,
            current_time: None,
        }
    }

    #[must_use]
    pub const fn at(mut self, current_time: f64) -> Self {
        self.current_time = Some(current_time);
        self
    }
}

/// What a receiver is told to play: the room to join and where to signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescriptor {
    pub room: String,
    pub signal_host: String,
    pub autoplay: bool,
}

impl MediaDescriptor {
    #[must_use]
    pub fn new(room: impl Into<String>, signal_host: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            signal_host: signal_host.into(),
            autoplay: true,
        }
    }
}
