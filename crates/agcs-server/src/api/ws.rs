//! Per-mission observer stream over WebSocket.
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tokio::time::{interval_at, Instant};

use agcs_core::error::MissionError;
use agcs_core::models::MissionId;
use agcs_core::protocol::{ClientMessage, StreamMessage};

use super::error::ApiError;
use crate::state::AppState;
use crate::telemetry::Subscription;

/// GET /v1/missions/:id/stream
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<MissionId>,
) -> Response {
    if let Err(err) = state.machine().get(mission_id).await {
        return ApiError::from(err).into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, mission_id))
        .into_response()
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, mission_id: MissionId) {
    let mut subscription = state.channel().subscribe(mission_id);
    let observer_id = subscription.id();
    tracing::info!(mission_id, observer_id, "Observer connected");

    let period = state.config().heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_text(&state, &subscription, &text).await {
                            if send_envelope(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => subscription.touch(),
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
            outgoing = subscription.recv() => {
                let Some(msg) = outgoing else {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                if send_envelope(&mut socket, &msg).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                // Liveness is recorded when the Pong comes back.
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    subscription.unsubscribe();
    tracing::info!(
        mission_id,
        observer_id,
        dropped = subscription.dropped(),
        "Observer disconnected"
    );
}

/// Dispatch one inbound text frame. Returns the reply envelope, if any.
async fn handle_client_text(
    state: &AppState,
    subscription: &Subscription,
    text: &str,
) -> Option<StreamMessage> {
    let mission_id = subscription.mission_id();
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            return Some(StreamMessage::Error {
                mission_id,
                timestamp: Utc::now(),
                message: format!("invalid message: {}", err),
            });
        }
    };

    match message {
        ClientMessage::Ping => {
            subscription.touch();
            Some(StreamMessage::Pong {
                mission_id,
                timestamp: Utc::now(),
            })
        }
        ClientMessage::Telemetry { mut data } => {
            data.mission_id = mission_id;
            state
                .channel()
                .publish_external(data)
                .err()
                .map(|err| error_envelope(mission_id, err))
        }
        ClientMessage::MissionStatus { data } => state
            .machine()
            .report_external_progress(mission_id, data)
            .await
            .err()
            .map(|err| error_envelope(mission_id, err)),
    }
}

fn error_envelope(mission_id: MissionId, err: MissionError) -> StreamMessage {
    StreamMessage::Error {
        mission_id,
        timestamp: Utc::now(),
        message: err.to_string(),
    }
}

async fn send_envelope(socket: &mut WebSocket, msg: &StreamMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(err) => {
            tracing::warn!(kind = msg.kind(), "Failed to encode stream message: {}", err);
            Ok(())
        }
    }
}
