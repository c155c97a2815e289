//! Device record, playback assessment and device events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sdk::{PlayerState, PlayerStatus, ReceiverStatus};

/// Connection state of a supervised device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Launched,
    Playing,
    Buffering,
    Stalled,
    Error,
}

impl DeviceState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Launched => "launched",
            Self::Playing => "playing",
            Self::Buffering => "buffering",
            Self::Stalled => "stalled",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one device, written only by its supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub host: String,
    pub display_name: String,
    pub assigned_room: String,
    pub state: DeviceState,
    pub player_state: Option<PlayerState>,
    pub buffering_count: u32,
    pub last_error: Option<String>,
    pub last_status: Option<ReceiverStatus>,
    pub status_updated_at: Option<DateTime<Utc>>,
}

impl DeviceRecord {
    #[must_use]
    pub fn new(host: impl Into<String>, display_name: impl Into<String>, assigned_room: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            display_name: display_name.into(),
            assigned_room: assigned_room.into(),
            state: DeviceState::Disconnected,
            player_state: None,
            buffering_count: 0,
            last_error: None,
            last_status: None,
            status_updated_at: None,
        }
    }
}

/// Why playback is being restarted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallReason {
    /// Neither playing nor buffering
    NotPlaying,
    /// Buffering with a negative playback position
    NegativeTime,
    /// Buffering for more consecutive polls than tolerated
    BufferingTooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackVerdict {
    Healthy,
    Buffering,
    Stalled(StallReason),
}

/// Turns consecutive player observations into recovery decisions.
///
/// A negative position while buffering forces one recovery per buffering
/// episode; the episode ends when playback is observed again. Later
/// buffering polls in the same episode fall back to the consecutive count.
#[derive(Debug, Clone)]
pub struct PlaybackMonitor {
    buffering_count: u32,
    max_buffering_polls: u32,
    negative_time_recovered: bool,
}

impl PlaybackMonitor {
    #[must_use]
    pub const fn new(max_buffering_polls: u32) -> Self {
        Self {
            buffering_count: 0,
            max_buffering_polls,
            negative_time_recovered: false,
        }
    }

    #[must_use]
    pub const fn buffering_count(&self) -> u32 {
        self.buffering_count
    }

    pub fn observe(&mut self, status: &PlayerStatus) -> PlaybackVerdict {
        match status.player_state {
            PlayerState::Playing => {
                self.buffering_count = 0;
                self.negative_time_recovered = false;
                PlaybackVerdict::Healthy
            }
            PlayerState::Buffering => {
                let negative = status.current_time.is_some_and(|t| t < 0.0);
                if negative && !self.negative_time_recovered {
                    self.negative_time_recovered = true;
                    self.buffering_count = 0;
                    PlaybackVerdict::Stalled(StallReason::NegativeTime)
                } else if self.buffering_count > self.max_buffering_polls {
                    self.buffering_count = 0;
                    PlaybackVerdict::Stalled(StallReason::BufferingTooLong)
                } else {
                    self.buffering_count += 1;
                    PlaybackVerdict::Buffering
                }
            }
            _ => {
                self.buffering_count = 0;
                self.negative_time_recovered = false;
                PlaybackVerdict::Stalled(StallReason::NotPlaying)
            }
        }
    }
}

/// Published by supervisors in the order things happen on a device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    StateChanged { host: String, state: DeviceState },
    ReceiverStatus { host: String, status: ReceiverStatus },
    PlayerStatus { host: String, status: PlayerStatus },
    Recovering { host: String, reason: StallReason },
    Resumed { host: String },
    /// Supervision paused until an external reset
    Paused { host: String, error: String },
    /// The control connection reported an error; supervision ended
    Lost { host: String, error: String },
}

impl DeviceEvent {
    #[must_use]
    pub fn host(&self) -> &str {
        match self {
            Self::StateChanged { host, .. }
            | Self::ReceiverStatus { host, .. }
            | Self::PlayerStatus { host, .. }
            | Self::Recovering { host, .. }
            | Self::Resumed { host }
            | Self::Paused { host, .. }
            | Self::Lost { host, .. } => host,
        }
    }
}
