//! Signaling relay for DashCast
//!
//! Rooms pair one broadcaster (the capture page) with any number of viewers
//! (cast receivers). The relay forwards SDP offers, answers and ICE
//! candidates without looking inside them, and carries the ping/pong
//! heartbeat used by the stream watchdog.
//!
//! Transport is not part of this crate: connections are registered with
//! [`SignalingRelay::connect`] and drain their [`ServerEvent`] queue however
//! they like.

pub mod error;
pub mod message;
pub mod relay;
pub mod room;

pub use error::RelayError;
pub use message::{ClientEvent, MessageKind, Role, ServerEvent, SignalingMessage};
pub use relay::{Delivery, PongEvent, RelayConnection, SignalingRelay, DEFAULT_OUTBOUND_BUFFER};
pub use room::RoomSnapshot;
