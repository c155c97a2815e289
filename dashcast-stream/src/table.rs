//! Stream liveness records
//!
//! Each active capture session has one [`Liveness`] record, keyed by room.
//! The watchdog owning the stream is the only writer apart from pong
//! observation, which only advances the pong timestamp.

use chrono::{DateTime, Utc};
use dashcast_core::{RoomId, SubscriptionId};
use dashcast_relay::SignalingRelay;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time view of a stream for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub screen_name: String,
    pub room: RoomId,
    pub started_at: DateTime<Utc>,
    pub last_ping_at: Option<DateTime<Utc>>,
    pub last_pong_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
}

#[derive(Debug)]
struct LivenessState {
    record: StreamRecord,
    last_pong: Option<Instant>,
}

#[derive(Debug)]
pub struct Liveness {
    state: Mutex<LivenessState>,
}

impl Liveness {
    #[must_use]
    pub fn new(screen_name: impl Into<String>, room: RoomId) -> Self {
        Self {
            state: Mutex::new(LivenessState {
                record: StreamRecord {
                    screen_name: screen_name.into(),
                    room,
                    started_at: Utc::now(),
                    last_ping_at: None,
                    last_pong_at: None,
                    restart_count: 0,
                },
                last_pong: None,
            }),
        }
    }

    pub fn record_ping(&self) {
        self.state.lock().record.last_ping_at = Some(Utc::now());
    }

    pub fn record_pong(&self) {
        let mut state = self.state.lock();
        state.last_pong = Some(Instant::now());
        state.record.last_pong_at = Some(Utc::now());
    }

    /// True when no pong was seen within `window` before `now`
    #[must_use]
    pub fn is_silent(&self, now: Instant, window: Duration) -> bool {
        let threshold = now.checked_sub(window);
        match (self.state.lock().last_pong, threshold) {
            (None, _) => true,
            (Some(last), Some(threshold)) => last < threshold,
            (Some(_), None) => false,
        }
    }

    pub fn count_restart(&self) -> u32 {
        let mut state = self.state.lock();
        state.record.restart_count += 1;
        state.record.restart_count
    }

    #[must_use]
    pub fn snapshot(&self) -> StreamRecord {
        self.state.lock().record.clone()
    }
}

/// Active streams keyed by room
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: DashMap<RoomId, Arc<Liveness>>,
}

impl StreamTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the record for a starting stream, replacing any stale one
    pub fn insert(&self, screen_name: &str, room: RoomId) -> Arc<Liveness> {
        let liveness = Arc::new(Liveness::new(screen_name, room.clone()));
        self.streams.insert(room, Arc::clone(&liveness));
        liveness
    }

    /// Drop the record only if it is still the one handed out for `liveness`
    pub fn remove(&self, liveness: &Arc<Liveness>) {
        let room = liveness.snapshot().room;
        self.streams
            .remove_if(&room, |_, current| Arc::ptr_eq(current, liveness));
    }

    /// Record a pong for `room`. Returns false when no stream feeds that room.
    pub fn record_pong(&self, room: &RoomId) -> bool {
        match self.streams.get(room) {
            Some(liveness) => {
                liveness.record_pong();
                true
            }
            None => false,
        }
    }

    /// Feed every pong the relay sees into this table
    pub fn observe(self: &Arc<Self>, relay: &SignalingRelay) -> SubscriptionId {
        let table = Arc::clone(self);
        relay.on_pong(move |event| {
            if !table.record_pong(&event.room) {
                tracing::debug!(room_id = %event.room, "Pong for a room without a stream");
            }
        })
    }

    #[must_use]
    pub fn get(&self, room: &RoomId) -> Option<StreamRecord> {
        self.streams.get(room).map(|liveness| liveness.snapshot())
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<StreamRecord> {
        let mut streams: Vec<StreamRecord> = self.streams.iter().map(|entry| entry.value().snapshot()).collect();
        streams.sort_by(|a, b| a.screen_name.cmp(&b.screen_name));
        streams
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
