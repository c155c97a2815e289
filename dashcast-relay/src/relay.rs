//! Room-based signaling relay
//!
//! Matches one broadcaster with the viewers of a room and forwards opaque
//! signaling payloads between them. Every operation that touches a room runs
//! under that room's lock, so a viewer join can never interleave with a
//! broadcaster's `ready` fan-out. Different rooms proceed independently.

use chrono::{DateTime, Utc};
use dashcast_core::{ConnectionId, RoomId, SubscriptionId, Subscribers};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::message::{Role, ServerEvent, SignalingMessage};
use crate::room::{Room, RoomSnapshot};

/// Default outbound queue length per connection
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// A connection registered with the relay and the queue of events addressed to it
pub struct RelayConnection {
    pub id: ConnectionId,
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Heartbeat answer observed on a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PongEvent {
    pub room: RoomId,
    pub from: ConnectionId,
    pub at: DateTime<Utc>,
}

/// Where a relayed payload went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Broadcaster payload fanned out to this many viewers
    FanOut(usize),
    /// Viewer payload handed to the broadcaster
    ToBroadcaster,
    /// No recipient; the payload was discarded
    Dropped,
}

pub struct SignalingRelay {
    rooms: DashMap<RoomId, Arc<Mutex<Room>>>,
    memberships: DashMap<ConnectionId, RoomId>,
    connections: DashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    pong_observers: Subscribers<PongEvent>,
    outbound_buffer: usize,
}

impl Default for SignalingRelay {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_BUFFER)
    }
}

impl SignalingRelay {
    #[must_use]
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            connections: DashMap::new(),
            pong_observers: Subscribers::new(),
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    /// Register a new connection and hand back its event queue
    pub fn connect(&self) -> RelayConnection {
        let id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        self.connections.insert(id.clone(), tx);
        debug!(conn_id = %id, total = self.connections.len(), "Signaling connection registered");
        RelayConnection { id, events: rx }
    }

    /// Forget a connection entirely: room membership and event queue
    pub fn disconnect(&self, conn_id: &ConnectionId) {
        self.leave(conn_id);
        self.connections.remove(conn_id);
        info!(conn_id = %conn_id, "Client has disconnected");
    }

    /// Put `conn_id` into `room_id` with the given role.
    ///
    /// A broadcaster join replaces any previous broadcaster (the previous one
    /// stays in the room as a plain member) and sends `ready` to everyone in
    /// the room. A viewer join reveals the viewer to the broadcaster through
    /// `joined`, or waits silently when there is none yet.
    pub fn join(&self, conn_id: &ConnectionId, room_id: &RoomId, role: Role) {
        let previous = self.memberships.insert(conn_id.clone(), room_id.clone());
        if let Some(previous) = previous.filter(|previous| previous != room_id) {
            debug!(conn_id = %conn_id, from = %previous, to = %room_id, "Connection switches rooms");
            self.leave_room(conn_id, &previous);
        }

        self.with_room(room_id, true, |room| match role {
            Role::Broadcaster => {
                room.viewers.remove(conn_id);
                if let Some(replaced) = room.broadcaster.replace(conn_id.clone()) {
                    if &replaced != conn_id {
                        warn!(
                            room_id = %room_id,
                            conn_id = %conn_id,
                            replaced = %replaced,
                            "Broadcaster replaced by a newer registration"
                        );
                        room.viewers.insert(replaced);
                    }
                }

                info!(room_id = %room_id, conn_id = %conn_id, "Broadcaster joined room");
                for member in room.members() {
                    self.deliver(member, ServerEvent::Ready { room: room_id.clone() });
                }
            }
            Role::Viewer => {
                if room.is_broadcaster(conn_id) {
                    room.broadcaster = None;
                }
                room.viewers.insert(conn_id.clone());

                if let Some(broadcaster) = &room.broadcaster {
                    info!(room_id = %room_id, conn_id = %conn_id, "New viewer for room");
                    self.deliver(
                        broadcaster,
                        ServerEvent::Joined {
                            room: room_id.clone(),
                            conn_id: conn_id.clone(),
                        },
                    );
                } else {
                    info!(room_id = %room_id, conn_id = %conn_id, "Viewer waiting, no broadcaster yet");
                }
            }
        });
    }

    /// Forward a signaling payload.
    ///
    /// From the broadcaster: to every viewer except the sender, untagged.
    /// From anyone else: to the broadcaster alone, tagged with the sender id.
    /// Without a broadcaster the payload is dropped.
    pub fn relay(&self, from: &ConnectionId, room_id: &RoomId, message: &SignalingMessage) -> Delivery {
        let delivery = self.with_room(room_id, false, |room| {
            if room.is_broadcaster(from) {
                let mut delivered = 0;
                for viewer in room.viewers.iter().filter(|viewer| *viewer != from) {
                    let event = ServerEvent::Message {
                        room: room_id.clone(),
                        message: message.clone(),
                        from: None,
                    };
                    if self.deliver(viewer, event) {
                        delivered += 1;
                    }
                }
                debug!(
                    room_id = %room_id,
                    kind = %message.kind(),
                    viewers = delivered,
                    "Message from broadcaster forwarded to viewers"
                );
                Delivery::FanOut(delivered)
            } else if let Some(broadcaster) = &room.broadcaster {
                let event = ServerEvent::Message {
                    room: room_id.clone(),
                    message: message.clone(),
                    from: Some(from.clone()),
                };
                debug!(
                    room_id = %room_id,
                    conn_id = %from,
                    kind = %message.kind(),
                    "Message from viewer forwarded to broadcaster"
                );
                if self.deliver(broadcaster, event) {
                    Delivery::ToBroadcaster
                } else {
                    Delivery::Dropped
                }
            } else {
                debug!(room_id = %room_id, conn_id = %from, kind = %message.kind(), "No broadcaster for room, message dropped");
                Delivery::Dropped
            }
        });

        if delivery.is_some() && message.kind().is_terminal() {
            // Rooms outlive negotiations; membership is left untouched
            info!(room_id = %room_id, conn_id = %from, "Peer ended negotiation");
        }

        delivery.unwrap_or_else(|| {
            debug!(room_id = %room_id, conn_id = %from, "Message for unknown room dropped");
            Delivery::Dropped
        })
    }

    /// Remove a connection from whatever room it is in.
    ///
    /// Remaining peers are not told; the media stack notices on its own.
    pub fn leave(&self, conn_id: &ConnectionId) {
        if let Some((_, room_id)) = self.memberships.remove(conn_id) {
            self.leave_room(conn_id, &room_id);
        }
    }

    /// Send a heartbeat probe to the room's broadcaster. Returns whether it was queued.
    pub fn ping(&self, room_id: &RoomId) -> bool {
        self.with_room(room_id, false, |room| {
            room.broadcaster
                .as_ref()
                .is_some_and(|broadcaster| self.deliver(broadcaster, ServerEvent::Ping { room: room_id.clone() }))
        })
        .unwrap_or(false)
    }

    /// Record a heartbeat answer and notify pong observers in registration order
    pub fn pong(&self, conn_id: &ConnectionId, room_id: &RoomId) {
        let at = Utc::now();
        self.with_room(room_id, false, |room| room.last_pong_at = Some(at));
        debug!(room_id = %room_id, conn_id = %conn_id, "Pong received");

        self.pong_observers.emit(&PongEvent {
            room: room_id.clone(),
            from: conn_id.clone(),
            at,
        });
    }

    /// Queue an event for a single connection, outside any room
    pub fn send(&self, conn_id: &ConnectionId, event: ServerEvent) -> bool {
        self.deliver(conn_id, event)
    }

    pub fn on_pong<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&PongEvent) + Send + Sync + 'static,
    {
        self.pong_observers.subscribe(observer)
    }

    pub fn remove_pong_observer(&self, id: SubscriptionId) -> bool {
        self.pong_observers.unsubscribe(id)
    }

    #[must_use]
    pub fn room(&self, room_id: &RoomId) -> Option<RoomSnapshot> {
        self.with_room(room_id, false, |room| room.snapshot())
    }

    #[must_use]
    pub fn rooms(&self) -> Vec<RoomSnapshot> {
        let rooms: Vec<Arc<Mutex<Room>>> = self.rooms.iter().map(|entry| Arc::clone(entry.value())).collect();
        let mut snapshots: Vec<RoomSnapshot> = rooms
            .iter()
            .filter_map(|room| {
                let room = room.lock();
                (!room.retired).then(|| room.snapshot())
            })
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    #[must_use]
    pub fn room_of(&self, conn_id: &ConnectionId) -> Option<RoomId> {
        self.memberships.get(conn_id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run `f` under the lock of a live room.
    ///
    /// Rooms emptied by `leave` are retired and unlinked; an operation that
    /// lands on a retired room retries against the table (or gives up when
    /// `create` is false).
    fn with_room<R>(&self, room_id: &RoomId, create: bool, f: impl FnOnce(&mut Room) -> R) -> Option<R> {
        loop {
            let room = if create {
                Arc::clone(
                    self.rooms
                        .entry(room_id.clone())
                        .or_insert_with(|| Arc::new(Mutex::new(Room::new(room_id.clone()))))
                        .value(),
                )
            } else {
                Arc::clone(self.rooms.get(room_id)?.value())
            };

            let mut guard = room.lock();
            if !guard.retired {
                return Some(f(&mut guard));
            }
            drop(guard);

            if !create {
                return None;
            }
            self.rooms.remove_if(room_id, |_, existing| Arc::ptr_eq(existing, &room));
        }
    }

    fn leave_room(&self, conn_id: &ConnectionId, room_id: &RoomId) {
        let Some(room) = self.rooms.get(room_id).map(|entry| Arc::clone(entry.value())) else {
            return;
        };

        let emptied = {
            let mut guard = room.lock();
            if guard.retired || !guard.remove(conn_id) {
                return;
            }
            info!(room_id = %room_id, conn_id = %conn_id, members = guard.members().count(), "Connection left room");
            guard.retired = guard.is_empty();
            guard.retired
        };

        if emptied {
            self.rooms.remove_if(room_id, |_, existing| Arc::ptr_eq(existing, &room));
            debug!(room_id = %room_id, "Empty room removed");
        }
    }

    fn deliver(&self, to: &ConnectionId, event: ServerEvent) -> bool {
        let Some(sender) = self.connections.get(to) else {
            debug!(conn_id = %to, "Recipient not connected, event dropped");
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %to, "Outbound queue full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %to, "Outbound queue closed, event dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use parking_lot::Mutex as SyncMutex;

    fn drain(connection: &mut RelayConnection) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = connection.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn room(id: &str) -> RoomId {
        RoomId::from(id)
    }

    #[test]
    fn test_broadcaster_join_sends_ready_to_every_member() {
        let relay = SignalingRelay::default();
        let mut v1 = relay.connect();
        let mut v2 = relay.connect();
        let mut b = relay.connect();

        relay.join(&v1.id, &room("r1"), Role::Viewer);
        relay.join(&v2.id, &room("r1"), Role::Viewer);
        assert!(drain(&mut v1).is_empty());
        assert!(drain(&mut v2).is_empty());

        relay.join(&b.id, &room("r1"), Role::Broadcaster);

        let ready = ServerEvent::Ready { room: room("r1") };
        assert_eq!(drain(&mut b), vec![ready.clone()]);
        assert_eq!(drain(&mut v1), vec![ready.clone()]);
        assert_eq!(drain(&mut v2), vec![ready]);
    }

    #[test]
    fn test_viewer_join_reveals_viewer_to_broadcaster_only() {
        let relay = SignalingRelay::default();
        let mut b = relay.connect();
        let mut v = relay.connect();
        let mut other = relay.connect();

        relay.join(&b.id, &room("r1"), Role::Broadcaster);
        relay.join(&other.id, &room("r1"), Role::Viewer);
        drain(&mut b);
        drain(&mut other);

        relay.join(&v.id, &room("r1"), Role::Viewer);

        assert_eq!(
            drain(&mut b),
            vec![ServerEvent::Joined {
                room: room("r1"),
                conn_id: v.id.clone()
            }]
        );
        assert!(drain(&mut v).is_empty());
        assert!(drain(&mut other).is_empty());
    }

    #[test]
    fn test_second_broadcaster_replaces_first() {
        let relay = SignalingRelay::default();
        let first = relay.connect();
        let second = relay.connect();
        let mut viewer = relay.connect();

        relay.join(&first.id, &room("r1"), Role::Broadcaster);
        relay.join(&viewer.id, &room("r1"), Role::Viewer);
        relay.join(&second.id, &room("r1"), Role::Broadcaster);
        drain(&mut viewer);

        let snapshot = relay.room(&room("r1")).unwrap();
        assert_eq!(snapshot.broadcaster, Some(second.id.clone()));
        assert!(!snapshot.viewers.contains(&second.id));

        // The viewer's replies now go to the newer registration only
        relay.relay(&viewer.id, &room("r1"), &SignalingMessage::answer("v=0"));
        let mut second = second;
        let mut first = first;
        assert_eq!(drain(&mut second).len(), 2); // ready + relayed answer
        assert!(drain(&mut first).iter().all(|event| !matches!(event, ServerEvent::Message { .. })));
    }

    #[test]
    fn test_broadcaster_fan_out_skips_sender() {
        let relay = SignalingRelay::default();
        let mut b = relay.connect();
        let mut v1 = relay.connect();
        let mut v2 = relay.connect();

        relay.join(&b.id, &room("r1"), Role::Broadcaster);
        relay.join(&v1.id, &room("r1"), Role::Viewer);
        relay.join(&v2.id, &room("r1"), Role::Viewer);
        drain(&mut b);
        drain(&mut v1);
        drain(&mut v2);

        let offer = SignalingMessage::offer("v=0");
        assert_eq!(relay.relay(&b.id, &room("r1"), &offer), Delivery::FanOut(2));

        let expected = ServerEvent::Message {
            room: room("r1"),
            message: offer,
            from: None,
        };
        assert_eq!(drain(&mut v1), vec![expected.clone()]);
        assert_eq!(drain(&mut v2), vec![expected]);
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn test_viewer_message_without_broadcaster_is_dropped() {
        let relay = SignalingRelay::default();
        let mut v1 = relay.connect();
        let mut v2 = relay.connect();
        relay.join(&v1.id, &room("r1"), Role::Viewer);
        relay.join(&v2.id, &room("r1"), Role::Viewer);

        let delivery = relay.relay(&v1.id, &room("r1"), &SignalingMessage::candidate(serde_json::json!({})));
        assert_eq!(delivery, Delivery::Dropped);
        assert!(drain(&mut v1).is_empty());
        assert!(drain(&mut v2).is_empty());

        let unknown = relay.relay(&v1.id, &room("nowhere"), &SignalingMessage::bye());
        assert_eq!(unknown, Delivery::Dropped);
    }

    #[test]
    fn test_viewer_message_is_tagged_with_sender() {
        let relay = SignalingRelay::default();
        let mut b = relay.connect();
        let v = relay.connect();
        relay.join(&b.id, &room("r1"), Role::Broadcaster);
        relay.join(&v.id, &room("r1"), Role::Viewer);
        drain(&mut b);

        assert_eq!(
            relay.relay(&v.id, &room("r1"), &SignalingMessage::bye()),
            Delivery::ToBroadcaster
        );
        match drain(&mut b).as_slice() {
            [ServerEvent::Message { message, from, .. }] => {
                assert_eq!(message.kind(), MessageKind::Bye);
                assert_eq!(from.as_ref(), Some(&v.id));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_broadcaster_bye_keeps_room_membership() {
        let relay = SignalingRelay::default();
        let b = relay.connect();
        let mut v1 = relay.connect();
        let mut v2 = relay.connect();
        relay.join(&b.id, &room("r1"), Role::Broadcaster);
        relay.join(&v1.id, &room("r1"), Role::Viewer);
        relay.join(&v2.id, &room("r1"), Role::Viewer);
        drain(&mut v1);
        drain(&mut v2);

        assert_eq!(
            relay.relay(&b.id, &room("r1"), &SignalingMessage::bye()),
            Delivery::FanOut(2)
        );
        for viewer in [&mut v1, &mut v2] {
            match drain(viewer).as_slice() {
                [ServerEvent::Message { message, from: None, .. }] => assert!(message.kind().is_terminal()),
                other => panic!("unexpected events: {other:?}"),
            }
        }

        let snapshot = relay.room(&room("r1")).unwrap();
        assert_eq!(snapshot.broadcaster.as_ref(), Some(&b.id));
        assert_eq!(snapshot.viewers.len(), 2);
    }

    #[test]
    fn test_leave_removes_from_both_slots_without_notifying() {
        let relay = SignalingRelay::default();
        let b = relay.connect();
        let mut v = relay.connect();
        relay.join(&b.id, &room("r1"), Role::Broadcaster);
        relay.join(&v.id, &room("r1"), Role::Viewer);
        drain(&mut v);

        relay.leave(&b.id);
        let snapshot = relay.room(&room("r1")).unwrap();
        assert!(snapshot.broadcaster.is_none());
        assert_eq!(snapshot.viewers, vec![v.id.clone()]);
        assert!(drain(&mut v).is_empty());
        assert!(relay.room_of(&b.id).is_none());

        relay.leave(&v.id);
        assert!(relay.room(&room("r1")).is_none());
        assert!(relay.rooms().is_empty());
    }

    #[test]
    fn test_connection_belongs_to_one_room() {
        let relay = SignalingRelay::default();
        let v = relay.connect();
        relay.join(&v.id, &room("r1"), Role::Viewer);
        relay.join(&v.id, &room("r2"), Role::Viewer);

        assert_eq!(relay.room_of(&v.id), Some(room("r2")));
        assert!(relay.room(&room("r1")).is_none());
        assert_eq!(relay.room(&room("r2")).unwrap().viewers, vec![v.id.clone()]);
    }

    #[test]
    fn test_rejoin_after_room_emptied() {
        let relay = SignalingRelay::default();
        let mut b = relay.connect();
        relay.join(&b.id, &room("r1"), Role::Broadcaster);
        relay.leave(&b.id);
        relay.join(&b.id, &room("r1"), Role::Broadcaster);

        assert_eq!(relay.room(&room("r1")).unwrap().broadcaster, Some(b.id.clone()));
        assert_eq!(drain(&mut b).len(), 2);
    }

    #[test]
    fn test_ping_reaches_broadcaster_only() {
        let relay = SignalingRelay::default();
        let mut b = relay.connect();
        let mut v = relay.connect();
        assert!(!relay.ping(&room("r1")));

        relay.join(&v.id, &room("r1"), Role::Viewer);
        assert!(!relay.ping(&room("r1")));

        relay.join(&b.id, &room("r1"), Role::Broadcaster);
        drain(&mut b);
        drain(&mut v);

        assert!(relay.ping(&room("r1")));
        assert_eq!(drain(&mut b), vec![ServerEvent::Ping { room: room("r1") }]);
        assert!(drain(&mut v).is_empty());
    }

    #[test]
    fn test_pong_updates_room_and_notifies_observers() {
        let relay = SignalingRelay::default();
        let b = relay.connect();
        relay.join(&b.id, &room("r1"), Role::Broadcaster);

        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = seen.clone();
        let id = relay.on_pong(move |event| sink.lock().push(event.room.clone()));

        relay.pong(&b.id, &room("r1"));
        assert_eq!(*seen.lock(), vec![room("r1")]);
        assert!(relay.room(&room("r1")).unwrap().last_pong_at.is_some());

        assert!(relay.remove_pong_observer(id));
        relay.pong(&b.id, &room("r1"));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let relay = SignalingRelay::new(1);
        let b = relay.connect();
        relay.join(&b.id, &room("r1"), Role::Broadcaster); // fills the queue with ready

        assert!(!relay.ping(&room("r1")));
    }

    #[test]
    fn test_send_addresses_one_connection() {
        let relay = SignalingRelay::default();
        let mut a = relay.connect();
        let mut b = relay.connect();

        assert!(relay.send(&a.id, ServerEvent::Ipaddr { address: "10.0.0.2".to_string() }));
        assert_eq!(drain(&mut a), vec![ServerEvent::Ipaddr { address: "10.0.0.2".to_string() }]);
        assert!(drain(&mut b).is_empty());

        relay.disconnect(&b.id);
        assert!(!relay.send(&b.id, ServerEvent::Ipaddr { address: "10.0.0.2".to_string() }));
    }

    #[test]
    fn test_disconnect_unregisters() {
        let relay = SignalingRelay::default();
        let b = relay.connect();
        relay.join(&b.id, &room("r1"), Role::Broadcaster);
        assert_eq!(relay.connection_count(), 1);

        relay.disconnect(&b.id);
        assert_eq!(relay.connection_count(), 0);
        assert!(relay.room(&room("r1")).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_keep_single_broadcaster() {
        let relay = Arc::new(SignalingRelay::default());
        let mut handles = Vec::new();
        for i in 0..32 {
            let relay = relay.clone();
            handles.push(tokio::spawn(async move {
                let conn = relay.connect();
                let role = if i % 4 == 0 { Role::Broadcaster } else { Role::Viewer };
                relay.join(&conn.id, &RoomId::from("busy"), role);
                conn.id
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = relay.room(&room("busy")).unwrap();
        assert!(snapshot.broadcaster.is_some());
        assert_eq!(snapshot.member_count(), 32);
        let broadcaster = snapshot.broadcaster.unwrap();
        assert!(!snapshot.viewers.contains(&broadcaster));
    }
}
