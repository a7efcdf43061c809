// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/ws/client` hub: chat clients join a session, send turns, and receive
//! the session's broadcast event stream.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use gateway_core::frame::ToBrainFrame;
use gateway_core::types::EventLevel;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::state::EdgeState;
use crate::transport::auth::{self, ClientIdentity};

const PRESENCE_TTL: Duration = Duration::from_secs(60);
const REPLAY_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ClientWsQuery {
    pub token: String,
    pub org_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    SessionJoin {
        session_id: Uuid,
    },
    SessionSend {
        session_id: Uuid,
        #[serde(default)]
        user_event_seq: u64,
        message: Option<String>,
        #[serde(default)]
        attachments: Vec<Value>,
        idempotency_key: Option<String>,
    },
    SessionResetAgent {
        session_id: Uuid,
        mode: String,
    },
    SessionCancel {
        session_id: Uuid,
    },
    SessionLeave {
        session_id: Uuid,
    },
}

pub async fn upgrade(
    State(state): State<Arc<EdgeState>>,
    Query(query): Query<ClientWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = match auth::verify_client_token(
        &state.config.auth_token_secret,
        &state.config.refresh_token_secret,
        &query.token,
    ) {
        Some(identity) if identity.organization_id == query.org_id => identity,
        _ => {
            return axum::http::Response::builder()
                .status(401)
                .body(axum::body::Body::from("unauthorized"))
                .unwrap_or_default()
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| handle(state, identity, socket)).into_response()
}

async fn handle(state: Arc<EdgeState>, identity: ClientIdentity, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut current: Option<(Uuid, tokio::sync::broadcast::Receiver<Value>)> = None;

    loop {
        let recv_fut = async {
            match current.as_mut() {
                Some((_, rx)) => rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&state, &identity, &mut current, &mut ws_tx, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }

            event = recv_fut => {
                if let Ok(event) = event {
                    if ws_tx.send(Message::Text(event.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    if let Some((session_id, _)) = current.take() {
        leave_session(&state, session_id).await;
    }
}

async fn handle_inbound(
    state: &Arc<EdgeState>,
    identity: &ClientIdentity,
    current: &mut Option<(Uuid, tokio::sync::broadcast::Receiver<Value>)>,
    ws_tx: &mut (impl futures_util::Sink<Message> + Unpin),
    text: &str,
) {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    let message = match parsed {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(err = %e, "undecodable client ws message");
            return;
        }
    };

    match message {
        ClientMessage::SessionJoin { session_id } => {
            if let Some((prev, _)) = current.take() {
                leave_session(state, prev).await;
            }

            match state.store.get_session(session_id).await {
                Ok(Some(session)) if session.organization_id == identity.organization_id => {}
                _ => {
                    let _ = ws_tx
                        .send(Message::Text(
                            json!({"type": "session_error", "sessionId": session_id, "code": "NOT_FOUND"})
                                .to_string()
                                .into(),
                        ))
                        .await;
                    return;
                }
            }

            let rx = state.session_subscribe(session_id).await;
            let _ = state
                .bus
                .set_add(&format!("session:edges:{session_id}"), &state.edge_id, PRESENCE_TTL)
                .await;

            if let Ok(events) = state.store.recent_session_events(session_id, REPLAY_LIMIT).await {
                for event in events {
                    let frame = json!({
                        "type": "session_event_v2",
                        "sessionId": event.session_id,
                        "seq": event.seq,
                        "eventType": event.event_type,
                        "payload": event.payload,
                    });
                    let _ = ws_tx.send(Message::Text(frame.to_string().into())).await;
                }
            }

            *current = Some((session_id, rx));
        }

        ClientMessage::SessionSend { session_id, user_event_seq, message, attachments, idempotency_key } => {
            let event = match state
                .store
                .append_session_event(
                    session_id,
                    "user_message",
                    EventLevel::Info,
                    json!({"message": message, "attachments": attachments}),
                    idempotency_key.clone(),
                )
                .await
            {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(err = %e, %session_id, "failed to append user_message event");
                    return;
                }
            };

            state
                .session_broadcast(
                    session_id,
                    json!({
                        "type": "session_event_v2",
                        "sessionId": event.session_id,
                        "seq": event.seq,
                        "eventType": event.event_type,
                        "payload": event.payload,
                    }),
                )
                .await;

            let frame = ToBrainFrame::SessionSend {
                request_id: Uuid::new_v4().to_string(),
                organization_id: identity.organization_id,
                user_id: identity.user_id,
                session_id,
                user_event_seq,
                message,
                attachments,
                idempotency_key,
                origin_edge_id: Some(state.edge_id.clone()),
                source: None,
            };
            publish_to_brain(state, &frame).await;
        }

        ClientMessage::SessionResetAgent { session_id, mode } => {
            let frame = ToBrainFrame::SessionReset {
                request_id: Uuid::new_v4().to_string(),
                organization_id: identity.organization_id,
                user_id: identity.user_id,
                session_id,
                mode,
                origin_edge_id: Some(state.edge_id.clone()),
            };
            publish_to_brain(state, &frame).await;
        }

        ClientMessage::SessionCancel { session_id } => {
            let frame = ToBrainFrame::SessionCancel {
                request_id: Uuid::new_v4().to_string(),
                organization_id: identity.organization_id,
                user_id: identity.user_id,
                session_id,
                origin_edge_id: Some(state.edge_id.clone()),
            };
            publish_to_brain(state, &frame).await;
        }

        ClientMessage::SessionLeave { session_id } => {
            if matches!(current, Some((current_id, _)) if *current_id == session_id) {
                *current = None;
            }
            leave_session(state, session_id).await;
        }
    }
}

async fn publish_to_brain(state: &Arc<EdgeState>, frame: &ToBrainFrame) {
    let Ok(body) = serde_json::to_value(frame) else { return };
    if let Err(e) = state.bus.append("gateway:bus:to_brain", &body).await {
        tracing::warn!(err = %e, "failed to publish frame to brain");
    }
}

async fn leave_session(state: &Arc<EdgeState>, session_id: Uuid) {
    if state.session_drop_if_unused(session_id).await {
        let _ = state.bus.set_remove(&format!("session:edges:{session_id}"), &state.edge_id).await;
    }
}
