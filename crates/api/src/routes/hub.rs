//! Realtime hub WebSocket endpoint.
//!
//! GET /hub
//!
//! Protocol:
//! - Client → server: `{"type":"joinGroup","group":"tenant:{id}"}` and
//!   `{"type":"leaveGroup","group":...}`
//! - Server → client: `{"event": name, "payload": {...}}` for every broadcast
//!   to a joined group

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{Sink, SinkExt, StreamExt};
use notifications::{ConnectionId, HubEvent, NotificationHub};
use serde::Deserialize;

use crate::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    JoinGroup { group: String },
    LeaveGroup { group: String },
}

/// GET /hub — upgrades to a hub connection.
pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(socket, state.hub))
}

/// Applies a client text frame to the hub. Unknown or malformed frames are
/// ignored.
pub fn apply_client_frame(hub: &NotificationHub, id: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::JoinGroup { group }) => {
            if hub.join_group(id, &group) {
                tracing::debug!(connection = %id, %group, "Joined group");
            }
        }
        Ok(ClientFrame::LeaveGroup { group }) => {
            hub.leave_group(id, &group);
            tracing::debug!(connection = %id, %group, "Left group");
        }
        Err(e) => tracing::debug!(connection = %id, error = %e, "Ignoring client frame"),
    }
}

async fn session(socket: WebSocket, hub: Arc<NotificationHub>) {
    let (mut sink, mut stream) = socket.split();
    let (id, mut events) = hub.on_connect();

    tracing::info!(connection = %id, "Hub connection opened");

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            event = events.recv() => match event {
                Some(event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => apply_client_frame(&hub, id, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(connection = %id, error = %e, "Hub connection error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    hub.on_disconnect(id);
    tracing::info!(connection = %id, "Hub connection closed");
}

async fn send_event<S>(sink: &mut S, event: &HubEvent) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(text) => sink.send(Message::Text(text.into())).await,
        Err(e) => {
            tracing::warn!(event = %event.event, error = %e, "Could not encode hub event");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_use_camel_case_tags() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"joinGroup","group":"tenant:1"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::JoinGroup {
                group: "tenant:1".to_string()
            }
        );
    }

    #[test]
    fn join_and_leave_frames_update_membership() {
        let hub = NotificationHub::new();
        let (id, mut rx) = hub.on_connect();

        apply_client_frame(&hub, id, r#"{"type":"joinGroup","group":"tenant:a"}"#);
        assert_eq!(hub.group_size("tenant:a"), 1);
        assert_eq!(hub.broadcast("tenant:a", "StockChanged", json!({"productId": 1})), 1);
        assert_eq!(rx.try_recv().unwrap().event, "StockChanged");

        apply_client_frame(&hub, id, r#"{"type":"leaveGroup","group":"tenant:a"}"#);
        assert_eq!(hub.group_size("tenant:a"), 0);
        assert_eq!(hub.broadcast("tenant:a", "StockChanged", json!({})), 0);
    }

    #[test]
    fn malformed_frames_are_ignored() {
        let hub = NotificationHub::new();
        let (id, _rx) = hub.on_connect();

        apply_client_frame(&hub, id, "not json");
        apply_client_frame(&hub, id, r#"{"type":"shout","group":"tenant:a"}"#);

        assert_eq!(hub.group_size("tenant:a"), 0);
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn server_frames_carry_event_and_payload() {
        let event = HubEvent {
            event: "OrderCreated".to_string(),
            payload: json!({"orderCode": "ORD-1"}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"event": "OrderCreated", "payload": {"orderCode": "ORD-1"}}));
    }
}
