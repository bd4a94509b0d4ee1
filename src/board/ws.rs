//! Live board events over WebSocket.
//!
//! Every event belongs to one project and carries the ids of the users who
//! may view that project at the time it was published. A socket is bound
//! to its authenticated caller and only receives events addressed to them.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::api::SharedState;
use super::auth::Caller;
use super::models::*;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

/// Board change notifications; clients refetch or patch their view on receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    ProjectCreated {
        project: Project,
    },
    ProjectUpdated {
        project: Project,
    },
    ProjectDeleted {
        project_id: String,
    },
    MemberAdded {
        project_id: String,
        member: Member,
    },
    MemberRemoved {
        project_id: String,
        user_id: String,
    },
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task: Task,
    },
    TaskMoved {
        task_id: i64,
        from_status: TaskStatus,
        to_status: TaskStatus,
        order: i32,
    },
    TaskDeleted {
        project_id: String,
        task_id: i64,
    },
}

/// A serialized [`WsMessage`] and the users allowed to see it.
#[derive(Debug, Clone)]
pub struct BoardEvent {
    pub project_id: String,
    pub audience: Arc<[String]>,
    pub payload: String,
}

impl BoardEvent {
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.audience.iter().any(|id| id == user_id)
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

/// `GET /ws`: authenticated upgrade; 401 before any handshake for
/// anonymous callers.
pub async fn ws_handler(
    State(state): State<SharedState>,
    caller: Caller,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let rx = state.ws_tx.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, caller, rx))
}

async fn handle_socket(socket: WebSocket, caller: Caller, rx: broadcast::Receiver<BoardEvent>) {
    let (sender, receiver) = socket.split();
    let user_id = caller.id().to_string();
    tracing::debug!(user_id = %user_id, "websocket connected");
    run_socket_loop(sender, receiver, rx, &user_id).await;
    tracing::debug!(user_id = %user_id, "websocket closed");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines broadcast forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. Events not
/// addressed to `user_id` are skipped. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<BoardEvent>,
    user_id: &str,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("websocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) if !event.is_visible_to(user_id) => continue,
                    Ok(event) => {
                        if sender.send(Message::Text(event.payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "websocket client lagged behind board events");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to the sockets of `audience`.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(
    tx: &broadcast::Sender<BoardEvent>,
    project_id: &str,
    audience: Arc<[String]>,
    msg: &WsMessage,
) {
    match serde_json::to_string(msg) {
        Ok(payload) => {
            let _ = tx.send(BoardEvent {
                project_id: project_id.to_string(),
                audience,
                payload,
            });
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize board event");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_message_task_moved_serialization() {
        let msg = WsMessage::TaskMoved {
            task_id: 3,
            from_status: TaskStatus::Todo,
            to_status: TaskStatus::Done,
            order: 1,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "TaskMoved");
        assert_eq!(json["data"]["from_status"], "TODO");
        assert_eq!(json["data"]["to_status"], "DONE");
    }

    #[test]
    fn test_ws_message_deserialize_roundtrip() {
        let msg = WsMessage::TaskDeleted {
            project_id: "p1".into(),
            task_id: 42,
        };
        let json = serde_json::to_string(&msg).unwrap();
        match serde_json::from_str::<WsMessage>(&json).unwrap() {
            WsMessage::TaskDeleted { project_id, task_id } => {
                assert_eq!(project_id, "p1");
                assert_eq!(task_id, 42);
            }
            other => panic!("Expected TaskDeleted, got {:?}", other),
        }
    }

    fn audience(ids: &[&str]) -> Arc<[String]> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_broadcast_message_without_receivers_is_silent() {
        let (tx, rx) = broadcast::channel::<BoardEvent>(4);
        drop(rx);
        broadcast_message(
            &tx,
            "p",
            audience(&["u"]),
            &WsMessage::ProjectDeleted {
                project_id: "p".into(),
            },
        );
    }

    #[tokio::test]
    async fn test_broadcast_message_reaches_subscriber() {
        let (tx, mut rx) = broadcast::channel::<BoardEvent>(4);
        broadcast_message(
            &tx,
            "p",
            audience(&["owner", "viewer"]),
            &WsMessage::MemberRemoved {
                project_id: "p".into(),
                user_id: "u".into(),
            },
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.project_id, "p");
        assert!(event.payload.contains("\"MemberRemoved\""));
        assert!(event.payload.contains("\"user_id\":\"u\""));
    }

    #[test]
    fn test_event_visible_only_to_audience() {
        let event = BoardEvent {
            project_id: "p".into(),
            audience: audience(&["owner", "viewer"]),
            payload: "{}".into(),
        };
        assert!(event.is_visible_to("owner"));
        assert!(event.is_visible_to("viewer"));
        assert!(!event.is_visible_to("outsider"));
        assert!(!event.is_visible_to(""));
    }
}
