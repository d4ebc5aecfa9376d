//! WebSocket handlers for real-time updates
//!
//! This module streams notifications to connected clients as they are
//! emitted. Supports ping/pong for connection keepalive.

use crate::state::{AppContext, Notification};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

/// WebSocket message types for real-time communication
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum WebSocketMessage {
    /// Sent once after connecting
    #[serde(rename = "initial_state")]
    InitialState {
        /// Number of unread notifications
        unread: usize,
    },
    /// A notification was emitted
    #[serde(rename = "notification")]
    Notification {
        /// The notification
        notification: Notification,
    },
    /// Ping message for connection keepalive
    #[serde(rename = "ping")]
    Ping,
    /// Pong message responding to ping
    #[serde(rename = "pong")]
    Pong,
}

impl WebSocketMessage {
    fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text)),
            Err(e) => {
                error!("Failed to serialize WebSocket message: {}", e);
                None
            }
        }
    }
}

/// WebSocket upgrade handler
///
/// Sends the unread count first, then every notification published on the
/// context's event channel until the client disconnects.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, ctx))
}

// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, ctx: AppContext) {
    let (mut sender, mut receiver) = socket.split();

    info!("WebSocket client connected");

    // Subscribe before reading state so nothing emitted in between is lost
    let mut events = BroadcastStream::new(ctx.events().subscribe());

    let unread = ctx.notifications().iter().filter(|n| !n.read).count();
    if let Some(initial) = (WebSocketMessage::InitialState { unread }).to_message() {
        if let Err(e) = sender.send(initial).await {
            error!("Failed to send initial state: {}", e);
            return;
        }
    }

    // Use a channel to send messages from receiver to sender
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();

    // Task to forward messages from channel to sender
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = sender.send(msg).await {
                error!("Failed to send message: {}", e);
                break;
            }
        }
    });

    // Task to forward notifications
    let event_tx = tx.clone();
    let mut event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(notification) => {
                    let Some(msg) = (WebSocketMessage::Notification { notification }).to_message()
                    else {
                        continue;
                    };
                    if event_tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client lagging, notifications dropped");
                }
            }
        }
    });

    // Task to send periodic pings
    let ping_tx = tx.clone();
    let mut ping_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
            if ping_tx.send(Message::Ping(vec![])).is_err() {
                break;
            }
        }
    });

    // Receive messages
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<WebSocketMessage>(&text) {
                        Ok(WebSocketMessage::Ping) => {
                            if let Some(pong) = WebSocketMessage::Pong.to_message() {
                                if tx.send(pong).is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(other) => {
                            warn!("Received unhandled WebSocket message: {:?}", other);
                        }
                        Err(e) => debug!("Ignoring malformed WebSocket message: {}", e),
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket client disconnected");
                    break;
                }
                Ok(Message::Pong(_)) => {
                    // Client responded to ping
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for any task to complete
    tokio::select! {
        _ = &mut send_task => {
            event_task.abort();
            ping_task.abort();
            recv_task.abort();
        }
        _ = &mut event_task => {
            send_task.abort();
            ping_task.abort();
            recv_task.abort();
        }
        _ = &mut ping_task => {
            send_task.abort();
            event_task.abort();
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
            event_task.abort();
            ping_task.abort();
        }
    }

    info!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::NotificationKind;

    #[test]
    fn test_message_tags() {
        let json = serde_json::to_value(WebSocketMessage::InitialState { unread: 2 }).unwrap();
        assert_eq!(json["type"], "initial_state");
        assert_eq!(json["unread"], 2);

        let notification = Notification::new(NotificationKind::Info, "t", "m", "p1");
        let json = serde_json::to_value(WebSocketMessage::Notification { notification }).unwrap();
        assert_eq!(json["type"], "notification");
        assert_eq!(json["notification"]["project_id"], "p1");
    }

    #[test]
    fn test_ping_parses() {
        let msg: WebSocketMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, WebSocketMessage::Ping));
    }
}
