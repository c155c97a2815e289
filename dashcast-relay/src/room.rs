//! Room membership

use chrono::{DateTime, Utc};
use dashcast_core::{ConnectionId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One signaling channel: at most one broadcaster and any number of viewers
#[derive(Debug)]
pub struct Room {
    pub(crate) id: RoomId,
    pub(crate) broadcaster: Option<ConnectionId>,
    pub(crate) viewers: BTreeSet<ConnectionId>,
    pub(crate) last_pong_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
    /// Set once the room was emptied and unlinked from the table
    pub(crate) retired: bool,
}

impl Room {
    pub(crate) fn new(id: RoomId) -> Self {
        Self {
            id,
            broadcaster: None,
            viewers: BTreeSet::new(),
            last_pong_at: None,
            created_at: Utc::now(),
            retired: false,
        }
    }

    pub(crate) fn is_broadcaster(&self, conn_id: &ConnectionId) -> bool {
        self.broadcaster.as_ref() == Some(conn_id)
    }

    /// Every connection currently in the room, broadcaster first
    pub(crate) fn members(&self) -> impl Iterator<Item = &ConnectionId> {
        self.broadcaster.iter().chain(self.viewers.iter())
    }

    /// Drop `conn_id` from both the broadcaster slot and the viewer set
    pub(crate) fn remove(&mut self, conn_id: &ConnectionId) -> bool {
        let was_broadcaster = if self.is_broadcaster(conn_id) {
            self.broadcaster = None;
            true
        } else {
            false
        };
        self.viewers.remove(conn_id) || was_broadcaster
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.broadcaster.is_none() && self.viewers.is_empty()
    }

    pub(crate) fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            broadcaster: self.broadcaster.clone(),
            viewers: self.viewers.iter().cloned().collect(),
            last_pong_at: self.last_pong_at,
            created_at: self.created_at,
        }
    }
}

/// Point-in-time copy of a room for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub broadcaster: Option<ConnectionId>,
    pub viewers: Vec<ConnectionId>,
    pub last_pong_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RoomSnapshot {
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.viewers.len() + usize::from(self.broadcaster.is_some())
    }
}
