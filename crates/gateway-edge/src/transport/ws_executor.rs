// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/ws/executor` hub: one socket per connected executor. Inbound frames
//! update the route registry and fill reply keys; outbound commands arrive
//! from the per-edge bus stream via [`crate::bus_consumer`] and are
//! forwarded here through the socket registered in [`EdgeState`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use gateway_core::frame::{FromExecutorFrame, ToBrainFrame};
use gateway_core::types::{EngineAuthState, ExecutorKind, ExecutorRoute, Pool, ReplyEnvelope, ReplyStatus, WorkspaceCommit};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state::EdgeState;
use crate::transport::auth::{self, ExecutorIdentity};

#[derive(Debug, Deserialize)]
pub struct ExecutorWsQuery {
    pub token: String,
    #[serde(default = "default_pool")]
    pub pool: String,
}

fn default_pool() -> String {
    "managed".to_owned()
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub async fn upgrade(
    State(state): State<Arc<EdgeState>>,
    Query(query): Query<ExecutorWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let pool = match query.pool.as_str() {
        "byon" => Pool::Byon,
        _ => Pool::Managed,
    };

    let identity = match auth::verify_executor_token(state.bus.as_ref(), pool, &query.token).await {
        Ok(identity) => identity,
        Err(code) => {
            return axum::http::Response::builder()
                .status(code.http_status())
                .body(axum::body::Body::from("unauthorized"))
                .unwrap_or_default()
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| handle(state, identity, socket)).into_response()
}

async fn handle(state: Arc<EdgeState>, identity: ExecutorIdentity, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut executor_id = match identity.pool {
        Pool::Managed => Some(identity.uuid),
        Pool::Byon => None,
    };
    if let Some(id) = executor_id {
        state.register_executor_socket(id, tx.clone()).await;
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if ws_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&state, &identity, &mut executor_id, &tx, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    if let Some(id) = executor_id {
        state.deregister_executor_socket(id).await;
        let _ = state.scheduler.registry().deregister(id, identity.pool, identity.organization_id()).await;
    }
}

async fn handle_inbound(
    state: &Arc<EdgeState>,
    identity: &ExecutorIdentity,
    executor_id: &mut Option<Uuid>,
    self_tx: &mpsc::UnboundedSender<Message>,
    text: &str,
) {
    let parsed: Result<FromExecutorFrame, _> = serde_json::from_str(text);
    let frame = match parsed {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(err = %e, "undecodable executor ws message");
            return;
        }
    };

    match frame {
        FromExecutorFrame::ExecutorHelloV2 { capabilities } => {
            let id = match (identity.pool, *executor_id, capabilities.get("executorId").and_then(Value::as_str)) {
                (Pool::Managed, Some(id), _) => id,
                (Pool::Byon, _, Some(raw)) => match raw.parse::<Uuid>() {
                    Ok(id) => id,
                    Err(_) => return,
                },
                _ => return,
            };
            if *executor_id != Some(id) {
                *executor_id = Some(id);
                state.register_executor_socket(id, self_tx.clone()).await;
            }

            let existing = state.scheduler.registry().get(id).await.ok().flatten();
            let kinds: BTreeSet<ExecutorKind> = capabilities
                .get("kinds")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .filter_map(|s| serde_json::from_value(Value::String(s.to_owned())).ok())
                        .collect()
                })
                .unwrap_or_else(|| existing.as_ref().map(|r| r.kinds.clone()).unwrap_or_default());
            let labels: BTreeSet<String> = capabilities
                .get("labels")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_owned).collect())
                .unwrap_or_else(|| existing.as_ref().map(|r| r.labels.clone()).unwrap_or_default());
            let max_in_flight = capabilities
                .get("maxInFlight")
                .and_then(Value::as_u64)
                .map(|v| v.min(u64::from(u32::MAX)) as u32)
                .or_else(|| existing.as_ref().map(|r| r.max_in_flight))
                .unwrap_or(4)
                .min(state.config.executor_max_in_flight_cap);
            let mut engine_auth: BTreeMap<String, EngineAuthState> =
                existing.as_ref().map(|r| r.engine_auth.clone()).unwrap_or_default();
            if let Some(map) = capabilities.get("engineAuth").and_then(Value::as_object) {
                for (engine, verified) in map {
                    engine_auth.insert(
                        engine.clone(),
                        EngineAuthState {
                            oauth_verified: verified.as_bool().unwrap_or(false),
                            checked_at: Utc::now(),
                            reason: None,
                        },
                    );
                }
            }

            let route = ExecutorRoute {
                executor_id: id,
                pool: identity.pool,
                organization_id: identity.organization_id(),
                edge_id: state.edge_id.clone(),
                labels,
                kinds,
                max_in_flight,
                engine_auth,
                last_seen_ms: now_ms(),
                last_used_ms: existing.map(|r| r.last_used_ms).unwrap_or(0),
            };
            if let Err(e) = state.scheduler.registry().register(&route).await {
                tracing::warn!(err = %e, %id, "failed to register executor route");
            }
        }

        FromExecutorFrame::ToolResultV2 { request_id, result } => {
            refresh_last_seen(state, *executor_id).await;
            let status = if result.get("error").is_some() { ReplyStatus::Failed } else { ReplyStatus::Succeeded };
            let error = result.get("error").and_then(Value::as_str).map(str::to_owned);
            let workspace = result
                .get("workspace")
                .and_then(|v| serde_json::from_value::<WorkspaceCommit>(v.clone()).ok());
            let envelope = ReplyEnvelope {
                status,
                output: result.get("output").cloned(),
                error,
                content: result.get("content").cloned(),
                workspace,
            };
            put_reply(state, &request_id, &envelope).await;
        }

        FromExecutorFrame::ToolEventV2 { request_id, event } => {
            if let Some(id) = *executor_id {
                publish_to_brain(
                    state,
                    &ToBrainFrame::ExecutorEvent {
                        executor_id: id,
                        event: serde_json::json!({"requestId": request_id, "event": event}),
                    },
                )
                .await;
            }
        }

        FromExecutorFrame::SessionOpened { request_id, ok, error } => {
            let envelope = ReplyEnvelope {
                status: if ok { ReplyStatus::Succeeded } else { ReplyStatus::Failed },
                output: None,
                error,
                content: None,
                workspace: None,
            };
            put_reply(state, &request_id, &envelope).await;
        }

        FromExecutorFrame::TurnFinal { request_id, message, output } => {
            let envelope = ReplyEnvelope {
                status: ReplyStatus::Succeeded,
                output,
                error: None,
                content: message.map(Value::String),
                workspace: None,
            };
            put_reply(state, &request_id, &envelope).await;
        }

        FromExecutorFrame::TurnError { request_id, code, message } => {
            let envelope = ReplyEnvelope {
                status: ReplyStatus::Failed,
                output: None,
                error: Some(code),
                content: message.map(Value::String),
                workspace: None,
            };
            put_reply(state, &request_id, &envelope).await;
        }

        FromExecutorFrame::MemorySyncResult { request_id, result }
        | FromExecutorFrame::MemoryQueryResult { request_id, result } => {
            let envelope = ReplyEnvelope {
                status: ReplyStatus::Succeeded,
                output: Some(result),
                error: None,
                content: None,
                workspace: None,
            };
            put_reply(state, &request_id, &envelope).await;
        }
    }
}

async fn put_reply(state: &Arc<EdgeState>, request_id: &str, envelope: &ReplyEnvelope) {
    let ttl = state.config.results_ttl();
    if let Err(e) = state.results.put_reply(request_id, envelope, ttl).await {
        tracing::warn!(err = %e, %request_id, "failed to store executor reply");
    }
}

async fn refresh_last_seen(state: &Arc<EdgeState>, executor_id: Option<Uuid>) {
    let Some(id) = executor_id else { return };
    if let Ok(Some(mut route)) = state.scheduler.registry().get(id).await {
        route.last_seen_ms = now_ms();
        let _ = state.scheduler.registry().register(&route).await;
    }
}

async fn publish_to_brain(state: &Arc<EdgeState>, frame: &ToBrainFrame) {
    let Ok(body) = serde_json::to_value(frame) else { return };
    if let Err(e) = state.bus.append("gateway:bus:to_brain", &body).await {
        tracing::warn!(err = %e, "failed to publish executor event to brain");
    }
}
