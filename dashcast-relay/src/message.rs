//! Signaling payloads and the WebSocket envelope
//!
//! Payloads keep their wire shape untouched: `{type:"offer", sdp}`,
//! `{type:"answer", sdp}`, `{type:"candidate", candidate}` and `{type:"bye"}`.
//! The relay reads `type` and nothing else.

use dashcast_core::{ConnectionId, RoomId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Offer,
    Answer,
    Candidate,
    Bye,
}

impl MessageKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "candidate" => Some(Self::Candidate),
            "bye" => Some(Self::Bye),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
            Self::Bye => "bye",
        }
    }

    /// Only `bye` ends a negotiation
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Bye)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque signaling payload tagged with its kind
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingMessage {
    kind: MessageKind,
    body: serde_json::Value,
}

impl SignalingMessage {
    /// Wrap a raw payload, rejecting anything without a known `type`
    pub fn from_value(body: serde_json::Value) -> Result<Self, RelayError> {
        let kind = body
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(RelayError::MissingType)
            .and_then(|t| MessageKind::parse(t).ok_or_else(|| RelayError::UnknownType(t.to_string())))?;

        Ok(Self { kind, body })
    }

    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Offer,
            body: serde_json::json!({ "type": "offer", "sdp": sdp.into() }),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Answer,
            body: serde_json::json!({ "type": "answer", "sdp": sdp.into() }),
        }
    }

    #[must_use]
    pub fn candidate(candidate: serde_json::Value) -> Self {
        Self {
            kind: MessageKind::Candidate,
            body: serde_json::json!({ "type": "candidate", "candidate": candidate }),
        }
    }

    #[must_use]
    pub fn bye() -> Self {
        Self {
            kind: MessageKind::Bye,
            body: serde_json::json!({ "type": "bye" }),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub const fn body(&self) -> &serde_json::Value {
        &self.body
    }
}

impl Serialize for SignalingMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SignalingMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let body = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(body).map_err(serde::de::Error::custom)
    }
}

/// Role requested on `join`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Broadcaster,
    Viewer,
}

impl Role {
    #[must_use]
    pub const fn from_flag(broadcaster: bool) -> Self {
        if broadcaster {
            Self::Broadcaster
        } else {
            Self::Viewer
        }
    }
}

/// Frames sent by a signaling client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Join {
        room: RoomId,
        #[serde(default)]
        broadcaster: bool,
    },
    Message {
        room: RoomId,
        message: SignalingMessage,
    },
    Pong {
        room: RoomId,
    },
    Ipaddr,
    Bye,
}

impl ClientEvent {
    pub fn decode(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text).map_err(RelayError::Decode)
    }
}

/// Frames delivered to a signaling client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A broadcaster (re)joined; negotiation should (re)start
    Ready { room: RoomId },
    /// Sent to the broadcaster when a viewer joins its room
    Joined { room: RoomId, conn_id: ConnectionId },
    /// Relayed payload. `from` is set only on viewer-to-broadcaster traffic.
    Message {
        room: RoomId,
        message: SignalingMessage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ConnectionId>,
    },
    /// Heartbeat probe for the broadcaster's capture pipeline
    Ping { room: RoomId },
    Ipaddr { address: String },
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(RelayError::Encode)
    }
}
