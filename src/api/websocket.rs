//! WebSocket delivery of report events.
//!
//! A client opens `GET /ws?userId=<id>` and receives every payload published
//! to `/medicalReportTopic/<id>` as a text frame, unchanged.
//!
//! Lifecycle:
//! 1. The topic subscription is taken before the upgrade completes
//! 2. The server pings every 30s; any pong resets the miss counter
//! 3. Three unanswered pings, a client close, or a closed topic end the session

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::api::error::ApiError;
use crate::api::topics::TopicSubscription;
use crate::api::types::ApiContext;
use crate::pipeline::publish::topic_for;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Disconnect after this many unanswered pings (3 × 30s = 90s).
const MAX_MISSED_HEARTBEATS: u32 = 3;

#[derive(Deserialize)]
pub struct SubscribeQuery {
    #[serde(rename = "userId")]
    user_id: String,
}

#[derive(Debug, PartialEq)]
pub(crate) enum HeartbeatAction {
    SendPing,
    HeartbeatTimeout,
}

/// Heartbeat bookkeeping, kept apart from the socket so it can be tested.
pub(crate) struct WsSessionState {
    missed_heartbeats: u32,
}

impl WsSessionState {
    fn new() -> Self {
        Self { missed_heartbeats: 0 }
    }

    fn on_pong(&mut self) {
        self.missed_heartbeats = 0;
    }

    fn on_heartbeat_tick(&mut self) -> HeartbeatAction {
        if self.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
            return HeartbeatAction::HeartbeatTimeout;
        }
        self.missed_heartbeats += 1;
        HeartbeatAction::SendPing
    }
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ctx): State<ApiContext>,
    Query(query): Query<SubscribeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = query.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("userId must not be empty".into()));
    }

    // Dropped with the upgrade closure if the handshake never completes.
    let events = ctx
        .topics
        .lease(&topic_for(user_id))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!(user_id, "Report subscriber connected");
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, events)))
}

async fn handle_ws(socket: WebSocket, mut events: TopicSubscription) {
    let topic = events.topic().to_string();
    let (mut sink, mut stream) = socket.split();
    let mut session = WsSessionState::new();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(payload) => {
                    if sink.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %topic, skipped, "Subscriber lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Pong(_))) => session.on_pong(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(topic = %topic, error = %e, "WebSocket receive error");
                    break;
                }
            },
            _ = heartbeat.tick() => match session.on_heartbeat_tick() {
                HeartbeatAction::SendPing => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                HeartbeatAction::HeartbeatTimeout => {
                    tracing::info!(topic = %topic, "{MAX_MISSED_HEARTBEATS} pings unanswered, disconnecting");
                    break;
                }
            },
        }
    }

    let _ = sink.close().await;
    drop(events);
    tracing::info!(topic = %topic, "Report subscriber disconnected");
}
