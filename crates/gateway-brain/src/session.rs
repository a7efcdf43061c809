// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-turn orchestration: pin re-use, executor selection, session open,
//! turn dispatch and cancellation. One turn at a time per session, enforced
//! by the `session:brain:<sessionId>` distributed lock acquired before any
//! of this runs.

use std::sync::Arc;
use std::time::Duration;

use gateway_bus::Bus;
use gateway_core::engine::EngineId;
use gateway_core::error::GatewayError;
use gateway_core::frame::{ExecutorSessionPayload, LegacyFrame, ToEdgeFrame};
use gateway_core::types::{EventLevel, ExecutorKind, ExecutorSelector, Pool, ReplyEnvelope, ReplyStatus, Session};
use gateway_scheduler::SelectionRequest;
use rand::Rng;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::state::{ActiveTurn, BrainState};

pub struct SessionSend {
    pub request_id: String,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub user_event_seq: u64,
    pub message: Option<String>,
    pub attachments: Vec<Value>,
    pub idempotency_key: Option<String>,
    pub origin_edge_id: Option<String>,
    pub source: Option<String>,
}

fn turn_request_id(session_id: Uuid) -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill(&mut bytes);
    let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{session_id}:{suffix}")
}

pub async fn handle_send(state: &Arc<BrainState>, shutdown: CancellationToken, send: SessionSend) {
    match state.acquire_turn_lock(send.session_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(session_id = %send.session_id, "turn lock held elsewhere; dropping");
            return;
        }
        Err(e) => {
            tracing::warn!(err = %e, session_id = %send.session_id, "failed to acquire turn lock");
            return;
        }
    }

    run_turn(state, &shutdown, &send).await;
    state.release_turn_lock(send.session_id).await;
}

async fn run_turn(state: &Arc<BrainState>, shutdown: &CancellationToken, send: &SessionSend) {
    let session = match state.store.get_session(send.session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            tracing::warn!(session_id = %send.session_id, "session_send for unknown session");
            return;
        }
        Err(e) => {
            tracing::warn!(err = %e, session_id = %send.session_id, "failed to load session");
            return;
        }
    };

    let Some(engine_id) = EngineId::parse(&session.engine_id) else {
        fail_turn(state, &session, GatewayError::ExecutorUnsupportedEngine).await;
        return;
    };

    let org_cap = match state.quotas.get(session.organization_id).await {
        Ok(cap) => cap,
        Err(e) => {
            tracing::warn!(err = %e, session_id = %session.session_id, "failed to load org quota");
            fail_turn(state, &session, GatewayError::Internal).await;
            return;
        }
    };

    let inline_secret = match resolve_engine_secret(state, &session).await {
        Ok(secret) => secret,
        Err(e) => {
            fail_turn(state, &session, e).await;
            return;
        }
    };
    let required_engine =
        (engine_id.requires_executor_oauth() && inline_secret.is_none()).then(|| engine_id.as_str().to_owned());

    let reservation_ttl = state.config.reserve_ttl();
    let prior_pin = session.pinned_executor_id;

    let mut route = None;
    if let Some(pinned) = prior_pin {
        match state
            .scheduler
            .reserve_pinned(pinned, session.organization_id, org_cap, required_engine.as_deref(), reservation_ttl)
            .await
        {
            Ok(r) => route = Some(r),
            Err(e @ (GatewayError::OrgQuotaExceeded | GatewayError::ExecutorOAuthNotVerified)) => {
                fail_turn(state, &session, e).await;
                return;
            }
            Err(GatewayError::PinnedAgentOffline) => {}
            Err(e) => {
                fail_turn(state, &session, e).await;
                return;
            }
        }
    }

    let route = match route {
        Some(r) => r,
        None => {
            let selector = session.executor_selector.clone().unwrap_or_default();
            let pool_order = pool_order_for_selector(&selector);
            match state
                .scheduler
                .select(SelectionRequest {
                    pool_order: &pool_order,
                    organization_id: session.organization_id,
                    selector: &selector,
                    kind: ExecutorKind::AgentRun,
                    required_engine: required_engine.as_deref(),
                    org_cap,
                    reservation_ttl,
                })
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    fail_turn(state, &session, e).await;
                    return;
                }
            }
        }
    };

    let executor_id = route.executor_id;
    let edge_id = route.edge_id.clone();

    if let Err(e) = state.store.save_session_pin(session.session_id, Some(executor_id), Some(route.pool)).await {
        tracing::warn!(err = %e, session_id = %session.session_id, "failed to persist session pin");
        let _ = state.scheduler.release(executor_id, session.organization_id).await;
        fail_turn(state, &session, GatewayError::Internal).await;
        return;
    }
    broadcast_legacy(
        state,
        session.session_id,
        LegacyFrame::SessionState { session_id: session.session_id, pinned_executor_id: Some(executor_id) },
    )
    .await;
    if let Some(prior) = prior_pin {
        if prior != executor_id {
            append_and_broadcast(
                state,
                session.session_id,
                "system",
                EventLevel::Info,
                json!({"action": "session_executor_failover", "from": prior, "to": executor_id}),
            )
            .await;
        }
    }

    state
        .track_turn(
            session.session_id,
            ActiveTurn { request_id: String::new(), executor_id, edge_id: edge_id.clone(), canceled: false },
        )
        .await;

    let session_timeout = Duration::from_millis(session.timeout_ms);
    let open_request_id = turn_request_id(session.session_id);
    let session_config = build_session_config(engine_id, &session, inline_secret.as_deref());
    let opened = publish_to_edge(
        state,
        &edge_id,
        ToEdgeFrame::ExecutorSession {
            executor_id,
            payload: ExecutorSessionPayload::SessionOpen {
                request_id: open_request_id.clone(),
                session_config,
            },
        },
    )
    .await;

    if opened.is_err() {
        fail_turn(state, &session, GatewayError::NoExecutorAvailable).await;
        finish_turn(state, executor_id, session.organization_id, session.session_id).await;
        return;
    }

    let open_timeout = state.config.session_open_timeout().min(session_timeout);
    match await_reply_or_shutdown(state, shutdown, &open_request_id, open_timeout).await {
        Some(envelope) if envelope.status == ReplyStatus::Succeeded => {}
        Some(envelope) => {
            fail_turn_with_message(state, &session, GatewayError::NodeExecutionFailed, envelope.error).await;
            finish_turn(state, executor_id, session.organization_id, session.session_id).await;
            return;
        }
        None => {
            fail_turn(state, &session, GatewayError::NodeExecutionTimeout).await;
            finish_turn(state, executor_id, session.organization_id, session.session_id).await;
            return;
        }
    }

    let turn_request = turn_request_id(session.session_id);
    state
        .track_turn(
            session.session_id,
            ActiveTurn { request_id: turn_request.clone(), executor_id, edge_id: edge_id.clone(), canceled: false },
        )
        .await;

    let dispatched = publish_to_edge(
        state,
        &edge_id,
        ToEdgeFrame::ExecutorSession {
            executor_id,
            payload: ExecutorSessionPayload::SessionTurn {
                request_id: turn_request.clone(),
                message: send.message.clone(),
                attachments: send.attachments.clone(),
            },
        },
    )
    .await;

    if dispatched.is_err() {
        fail_turn(state, &session, GatewayError::NoExecutorAvailable).await;
        finish_turn(state, executor_id, session.organization_id, session.session_id).await;
        return;
    }

    match await_reply_or_shutdown(state, shutdown, &turn_request, session_timeout).await {
        Some(envelope) if envelope.status == ReplyStatus::Succeeded => {
            let canceled = state.active_turn(session.session_id).await.map(|t| t.canceled).unwrap_or(false);
            if canceled {
                // the reply is already durable via the prior `results`/bus write; a
                // reply landing after cancellation is suppressed from user-visible
                // events but still recorded in the session's event log.
                append_session_event_only(
                    state,
                    session.session_id,
                    "agent_final",
                    EventLevel::Info,
                    json!({"message": envelope.content, "output": envelope.output, "suppressed": "canceled"}),
                )
                .await;
            } else {
                complete_turn(state, &session, send, envelope).await;
            }
        }
        Some(envelope) => {
            let canceled = state.active_turn(session.session_id).await.map(|t| t.canceled).unwrap_or(false)
                || envelope.error.as_deref() == Some("TURN_CANCELED");
            if canceled {
                append_and_broadcast(
                    state,
                    session.session_id,
                    "system",
                    EventLevel::Info,
                    json!({"action": "session_turn_canceled"}),
                )
                .await;
            } else {
                let code = envelope.error.clone().unwrap_or_else(|| GatewayError::NodeExecutionFailed.as_str().to_owned());
                append_and_broadcast(
                    state,
                    session.session_id,
                    "error",
                    EventLevel::Error,
                    json!({"code": code, "message": envelope.content}),
                )
                .await;
                broadcast_legacy(
                    state,
                    session.session_id,
                    LegacyFrame::SessionError { session_id: session.session_id, code, message: String::new() },
                )
                .await;
            }
        }
        None => {
            append_and_broadcast(
                state,
                session.session_id,
                "error",
                EventLevel::Error,
                json!({"code": GatewayError::NodeExecutionTimeout.as_str()}),
            )
            .await;
        }
    }

    finish_turn(state, executor_id, session.organization_id, session.session_id).await;
}

async fn complete_turn(state: &Arc<BrainState>, session: &Session, send: &SessionSend, envelope: ReplyEnvelope) {
    let message = envelope.content.as_ref().and_then(Value::as_str).map(str::to_owned).unwrap_or_default();

    append_and_broadcast(
        state,
        session.session_id,
        "agent_message",
        EventLevel::Info,
        json!({"delta": true, "message": message}),
    )
    .await;
    broadcast_legacy(
        state,
        session.session_id,
        LegacyFrame::AgentDelta { session_id: session.session_id, message: message.clone() },
    )
    .await;

    append_and_broadcast(
        state,
        session.session_id,
        "agent_final",
        EventLevel::Info,
        json!({"message": message, "output": envelope.output}),
    )
    .await;
    broadcast_legacy(
        state,
        session.session_id,
        LegacyFrame::AgentFinal {
            session_id: session.session_id,
            message: message.clone(),
            output: envelope.output.clone(),
        },
    )
    .await;

    if send.source.as_deref() == Some("channel") {
        if let Some(origin_edge_id) = &send.origin_edge_id {
            let frame = ToEdgeFrame::ChannelOutbound {
                organization_id: session.organization_id,
                session_id: session.session_id,
                session_event_seq: send.user_event_seq,
                source: "channel".to_owned(),
                text: message,
            };
            let _ = publish_to_edge(state, origin_edge_id, frame).await;
        }
    }
}

async fn finish_turn(state: &Arc<BrainState>, executor_id: Uuid, organization_id: Uuid, session_id: Uuid) {
    state.untrack_turn(session_id).await;
    let _ = state.scheduler.release(executor_id, organization_id).await;
}

pub async fn handle_reset(state: &Arc<BrainState>, session_id: Uuid, mode: String) {
    if let Err(e) = state.store.save_session_pin(session_id, None, None).await {
        tracing::warn!(err = %e, %session_id, "failed to clear session pin");
        return;
    }
    append_and_broadcast(
        state,
        session_id,
        "system",
        EventLevel::Info,
        json!({"action": "session_reset_agent", "mode": mode}),
    )
    .await;
    broadcast_legacy(
        state,
        session_id,
        LegacyFrame::SessionState { session_id, pinned_executor_id: None },
    )
    .await;
}

pub async fn handle_cancel(state: &Arc<BrainState>, session_id: Uuid, organization_id: Uuid) {
    let Some(turn) = state.active_turn(session_id).await else {
        tracing::debug!(%session_id, "session_cancel with no active turn");
        return;
    };

    match state.store.get_session(session_id).await {
        Ok(Some(session)) if session.organization_id == organization_id => {}
        _ => {
            tracing::warn!(%session_id, "session_cancel rejected: unknown session or organization mismatch");
            return;
        }
    }

    state.mark_turn_canceled(session_id).await;
    let _ = publish_to_edge(
        state,
        &turn.edge_id,
        ToEdgeFrame::ExecutorSession {
            executor_id: turn.executor_id,
            payload: ExecutorSessionPayload::SessionCancel { request_id: turn.request_id.clone() },
        },
    )
    .await;
    append_and_broadcast(
        state,
        session_id,
        "system",
        EventLevel::Info,
        json!({"action": "session_cancel_requested"}),
    )
    .await;
}

fn pool_order_for_selector(selector: &ExecutorSelector) -> Vec<Pool> {
    match selector.pool {
        Some(Pool::Managed) => vec![Pool::Managed],
        Some(Pool::Byon) => vec![Pool::Byon],
        None => vec![Pool::Byon, Pool::Managed],
    }
}

fn build_session_config(engine_id: EngineId, session: &Session, inline_secret: Option<&str>) -> Value {
    json!({
        "engine": {
            "id": engine_id.as_str(),
            "model": session.llm_model,
            "authMode": if inline_secret.is_some() { "inline" } else { "oauth" },
            "runtime": session.runtime,
            "auth": inline_secret,
        },
        "prompt": {
            "system": session.prompt_system,
            "instructions": session.prompt_instructions,
        },
        "toolsAllow": session.tools_allow,
        "limits": session.limits,
        "memoryProvider": session.memory_provider,
    })
}

async fn resolve_engine_secret(state: &Arc<BrainState>, session: &Session) -> Result<Option<String>, GatewayError> {
    let Some(secret_id) = session.llm_secret_id else { return Ok(None) };
    let kek = state.kek.as_ref().ok_or(GatewayError::Internal)?;
    let secret = state.store.get_secret(secret_id).await.map_err(|_| GatewayError::Internal)?;
    let secret = secret.ok_or(GatewayError::Internal)?;
    if secret.organization_id != session.organization_id {
        return Err(GatewayError::Internal);
    }
    kek.decrypt_to_string(&secret).map(Some).map_err(|_| GatewayError::Internal)
}

async fn await_reply_or_shutdown(
    state: &Arc<BrainState>,
    shutdown: &CancellationToken,
    request_id: &str,
    timeout: Duration,
) -> Option<ReplyEnvelope> {
    tokio::select! {
        _ = shutdown.cancelled() => None,
        result = state.results.await_reply(request_id, timeout) => result.ok(),
    }
}

async fn publish_to_edge(state: &Arc<BrainState>, edge_id: &str, frame: ToEdgeFrame) -> Result<(), ()> {
    let body = serde_json::to_value(&frame).map_err(|_| ())?;
    state.bus.append(&state.to_edge_stream(edge_id), &body).await.map(|_| ()).map_err(|e| {
        tracing::warn!(err = %e, %edge_id, "failed to publish frame to edge");
    })
}

async fn broadcast_to_session(state: &Arc<BrainState>, session_id: Uuid, event: Value) {
    let edges = state.bus.set_members(&format!("session:edges:{session_id}")).await.unwrap_or_default();
    for edge_id in edges {
        let _ = publish_to_edge(state, &edge_id, ToEdgeFrame::ClientBroadcast { session_id, event: event.clone() }).await;
    }
}

async fn broadcast_legacy(state: &Arc<BrainState>, session_id: Uuid, frame: LegacyFrame) {
    if let Ok(value) = serde_json::to_value(&frame) {
        broadcast_to_session(state, session_id, value).await;
    }
}

/// Persists a session event without broadcasting it to connected clients.
/// Used when a reply lands after cancellation: the idempotent record still
/// needs to exist, but the event itself must stay invisible to the user.
async fn append_session_event_only(
    state: &Arc<BrainState>,
    session_id: Uuid,
    event_type: &str,
    level: EventLevel,
    payload: Value,
) {
    if let Err(e) = state.store.append_session_event(session_id, event_type, level, payload, None).await {
        tracing::warn!(err = %e, %session_id, event_type, "failed to append session event");
    }
}

async fn append_and_broadcast(
    state: &Arc<BrainState>,
    session_id: Uuid,
    event_type: &str,
    level: EventLevel,
    payload: Value,
) {
    let event = match state.store.append_session_event(session_id, event_type, level, payload, None).await {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(err = %e, %session_id, event_type, "failed to append session event");
            return;
        }
    };
    broadcast_to_session(
        state,
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
}

async fn fail_turn(state: &Arc<BrainState>, session: &Session, err: GatewayError) {
    fail_turn_with_message(state, session, err, None).await;
}

async fn fail_turn_with_message(state: &Arc<BrainState>, session: &Session, err: GatewayError, message: Option<String>) {
    let code = err.as_str().to_owned();
    append_and_broadcast(
        state,
        session.session_id,
        "error",
        EventLevel::Error,
        json!({"code": code, "message": message}),
    )
    .await;
    broadcast_legacy(
        state,
        session.session_id,
        LegacyFrame::SessionError {
            session_id: session.session_id,
            code: code.clone(),
            message: message.unwrap_or(code),
        },
    )
    .await;
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
