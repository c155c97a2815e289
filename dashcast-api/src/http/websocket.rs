//! WebSocket signaling endpoint
//!
//! One JSON envelope per text frame. Frames are decoded into
//! [`ClientEvent`]s and applied to the relay; whatever the relay queues for
//! this connection is written back by a dedicated writer task.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use dashcast_core::ConnectionId;
use dashcast_relay::{ClientEvent, RelayConnection, Role, ServerEvent, SignalingRelay};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn, Instrument};

use crate::http::AppState;
use crate::net::ipv4_addresses;
use std::net::Ipv4Addr;

/// GET /ws
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max_message_size = state.config.relay.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let RelayConnection { id, mut events } = state.relay.connect();
    let span = tracing::info_span!("signaling", conn_id = %id);

    async move {
        info!("Client connected");
        let (mut sink, mut frames) = socket.split();

        let writer = tokio::spawn(
            async move {
                while let Some(event) = events.recv().await {
                    let text = match event.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Dropping unencodable event");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        debug!(error = %e, "WebSocket write failed");
                        break;
                    }
                }
            }
            .in_current_span(),
        );

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Message::Text(text)) => match ClientEvent::decode(text.as_str()) {
                    Ok(event) => dispatch(&state.relay, &id, event),
                    Err(e) => warn!(error = %e, "Ignoring malformed frame"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "WebSocket read failed");
                    break;
                }
            }
        }

        state.relay.disconnect(&id);
        writer.abort();
    }
    .instrument(span)
    .await;
}

/// Apply one client event to the relay on behalf of `conn_id`
pub fn dispatch(relay: &SignalingRelay, conn_id: &ConnectionId, event: ClientEvent) {
    match event {
        ClientEvent::Join { room, broadcaster } => {
            relay.join(conn_id, &room, Role::from_flag(broadcaster));
        }
        ClientEvent::Message { room, message } => {
            let delivery = relay.relay(conn_id, &room, &message);
            debug!(room_id = %room, kind = %message.kind(), ?delivery, "Signaling message relayed");
        }
        ClientEvent::Pong { room } => relay.pong(conn_id, &room),
        ClientEvent::Ipaddr => {
            if send_addresses(relay, conn_id, &ipv4_addresses()) == 0 {
                warn!("No non-loopback IPv4 address to report");
            }
        }
        ClientEvent::Bye => info!("Received bye"),
    }
}

/// One `ipaddr` frame per address. Returns how many were queued.
fn send_addresses(relay: &SignalingRelay, conn_id: &ConnectionId, addresses: &[Ipv4Addr]) -> usize {
    addresses
        .iter()
        .filter(|address| {
            relay.send(
                conn_id,
                ServerEvent::Ipaddr {
                    address: address.to_string(),
                },
            )
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashcast_core::RoomId;
    use dashcast_relay::SignalingMessage;

    fn drain(connection: &mut RelayConnection) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = connection.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn frame(relay: &SignalingRelay, conn: &RelayConnection, text: &str) {
        dispatch(relay, &conn.id, ClientEvent::decode(text).unwrap());
    }

    #[test]
    fn test_frames_drive_negotiation() {
        let relay = SignalingRelay::default();
        let mut broadcaster = relay.connect();
        let mut viewer = relay.connect();

        frame(&relay, &viewer, r#"{"event":"join","room":"lobby"}"#);
        frame(&relay, &broadcaster, r#"{"event":"join","room":"lobby","broadcaster":true}"#);
        assert_eq!(drain(&mut viewer), vec![ServerEvent::Ready { room: RoomId::from("lobby") }]);
        assert_eq!(drain(&mut broadcaster), vec![ServerEvent::Ready { room: RoomId::from("lobby") }]);

        frame(
            &relay,
            &viewer,
            r#"{"event":"message","room":"lobby","message":{"type":"offer","sdp":"v=0"}}"#,
        );
        assert_eq!(
            drain(&mut broadcaster),
            vec![ServerEvent::Message {
                room: RoomId::from("lobby"),
                message: SignalingMessage::offer("v=0"),
                from: Some(viewer.id.clone()),
            }]
        );
    }

    #[test]
    fn test_pong_frame_reaches_observers() {
        let relay = SignalingRelay::default();
        let broadcaster = relay.connect();
        frame(&relay, &broadcaster, r#"{"event":"join","room":"lobby","broadcaster":true}"#);

        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = seen.clone();
        relay.on_pong(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        frame(&relay, &broadcaster, r#"{"event":"pong","room":"lobby"}"#);
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(relay.room(&RoomId::from("lobby")).unwrap().last_pong_at.is_some());
    }

    #[test]
    fn test_bye_leaves_room_untouched() {
        let relay = SignalingRelay::default();
        let mut viewer = relay.connect();
        frame(&relay, &viewer, r#"{"event":"join","room":"lobby"}"#);
        frame(&relay, &viewer, r#"{"event":"bye"}"#);

        assert_eq!(relay.room_of(&viewer.id), Some(RoomId::from("lobby")));
        assert!(drain(&mut viewer).is_empty());
    }

    #[test]
    fn test_ipaddr_answers_the_requester_only() {
        let relay = SignalingRelay::default();
        let mut asker = relay.connect();
        let mut other = relay.connect();
        frame(&relay, &asker, r#"{"event":"ipaddr"}"#);

        for answer in drain(&mut asker) {
            let ServerEvent::Ipaddr { address } = answer else {
                panic!("unexpected answer: {answer:?}");
            };
            assert!(!address.parse::<Ipv4Addr>().unwrap().is_loopback());
        }
        assert!(drain(&mut other).is_empty());
    }

    #[test]
    fn test_every_address_gets_its_own_frame() {
        let relay = SignalingRelay::default();
        let mut asker = relay.connect();
        let addresses = [Ipv4Addr::new(192, 168, 1, 20), Ipv4Addr::new(10, 8, 0, 3)];

        assert_eq!(send_addresses(&relay, &asker.id, &addresses), 2);
        assert_eq!(
            drain(&mut asker),
            vec![
                ServerEvent::Ipaddr {
                    address: "192.168.1.20".to_string()
                },
                ServerEvent::Ipaddr {
                    address: "10.8.0.3".to_string()
                },
            ]
        );
    }
}
