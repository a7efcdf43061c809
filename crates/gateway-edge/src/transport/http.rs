// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Internal, service-token-authenticated HTTP API: workflow dispatch,
//! result lookup, route listing, and direct session/channel injectors.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use gateway_core::error::GatewayError;
use gateway_core::frame::{Dispatch, DispatchKind, ToBrainFrame, dispatch_request_id};
use gateway_core::types::Pool;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::state::EdgeState;

const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 60_000;
const MAX_DISPATCH_TIMEOUT_MS: u64 = 600_000;

fn clamp_timeout(requested: Option<u64>) -> Duration {
    Duration::from_millis(requested.unwrap_or(DEFAULT_DISPATCH_TIMEOUT_MS).min(MAX_DISPATCH_TIMEOUT_MS))
}

fn error_response(err: GatewayError, message: impl Into<String>) -> impl IntoResponse {
    err.to_http_response(message)
}

// -- Request/response bodies --------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub organization_id: Uuid,
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub node_id: String,
    pub attempt_count: u32,
    pub kind: DispatchKind,
    pub payload: Value,
    #[serde(default)]
    pub secret_refs: Vec<Uuid>,
    pub timeout_ms: Option<u64>,
}

impl DispatchRequest {
    fn into_dispatch(self) -> (String, Dispatch, Option<u64>) {
        let request_id = dispatch_request_id(self.run_id, &self.node_id, self.attempt_count);
        let dispatch = Dispatch {
            kind: self.kind,
            organization_id: self.organization_id,
            run_id: self.run_id,
            workflow_id: self.workflow_id,
            node_id: self.node_id,
            attempt_count: self.attempt_count,
            payload: self.payload,
            secret_refs: self.secret_refs,
        };
        (request_id, dispatch, self.timeout_ms)
    }
}

#[derive(Debug, Serialize)]
pub struct DispatchAsyncResponse {
    pub request_id: String,
    pub dispatched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RoutesQuery {
    pub organization_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RoutesResponse {
    pub routes: Vec<gateway_core::types::ExecutorRoute>,
}

#[derive(Debug, Deserialize)]
pub struct SessionSendRequest {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    #[serde(default)]
    pub user_event_seq: u64,
    pub message: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Value>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelTestSendRequest {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    #[serde(default)]
    pub user_event_seq: u64,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthzResponse {
    pub ok: bool,
    pub edge_id: String,
    pub joined_sessions: usize,
    pub connected_executors: usize,
}

// -- Handlers ------------------------------------------------------------------

pub async fn healthz(State(state): State<Arc<EdgeState>>) -> impl IntoResponse {
    let (joined_sessions, connected_executors) = state.connection_counts().await;
    Json(HealthzResponse { ok: true, edge_id: state.edge_id.clone(), joined_sessions, connected_executors })
}

pub async fn dispatch(
    State(state): State<Arc<EdgeState>>,
    Json(req): Json<DispatchRequest>,
) -> impl IntoResponse {
    let (request_id, dispatch, timeout_ms) = req.into_dispatch();

    match state.results.get_dispatch_response(&request_id).await {
        Ok(Some(cached)) => return (StatusCode::OK, Json(cached)).into_response(),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(err = %e, "dispatch response cache lookup failed");
        }
    }

    let frame = ToBrainFrame::WorkflowDispatch { request_id: request_id.clone(), dispatch, is_async: false };
    let Ok(body) = serde_json::to_value(&frame) else {
        return error_response(GatewayError::Internal, "failed to encode dispatch frame").into_response();
    };
    if let Err(e) = state.bus.append("gateway:bus:to_brain", &body).await {
        tracing::error!(err = %e, "failed to publish workflow_dispatch frame");
        return error_response(GatewayError::Internal, "bus unavailable").into_response();
    }

    match state.results.await_reply(&request_id, clamp_timeout(timeout_ms)).await {
        Ok(envelope) => (StatusCode::OK, Json(json!({"requestId": request_id, "response": envelope}))).into_response(),
        Err(_) => error_response(GatewayError::GatewayTimeout, "dispatch did not complete in time").into_response(),
    }
}

pub async fn dispatch_async(
    State(state): State<Arc<EdgeState>>,
    Json(req): Json<DispatchRequest>,
) -> impl IntoResponse {
    let (request_id, dispatch, _timeout_ms) = req.into_dispatch();

    match state.results.get_dispatch_response(&request_id).await {
        Ok(Some(_)) => {
            return (
                StatusCode::OK,
                Json(DispatchAsyncResponse { request_id, dispatched: false, cached: Some(true) }),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(err = %e, "dispatch response cache lookup failed"),
    }

    let frame = ToBrainFrame::WorkflowDispatch { request_id: request_id.clone(), dispatch, is_async: true };
    let Ok(body) = serde_json::to_value(&frame) else {
        return error_response(GatewayError::Internal, "failed to encode dispatch frame").into_response();
    };
    if let Err(e) = state.bus.append("gateway:bus:to_brain", &body).await {
        tracing::error!(err = %e, "failed to publish workflow_dispatch frame");
        return error_response(GatewayError::Internal, "bus unavailable").into_response();
    }

    (StatusCode::CREATED, Json(DispatchAsyncResponse { request_id, dispatched: true, cached: None }))
        .into_response()
}

pub async fn results(
    State(state): State<Arc<EdgeState>>,
    Path(request_id): Path<String>,
) -> impl IntoResponse {
    match state.results.get_dispatch_response(&request_id).await {
        Ok(Some(value)) => (StatusCode::OK, Json(value)).into_response(),
        Ok(None) => error_response(GatewayError::NotFound, "RESULT_NOT_READY").into_response(),
        Err(e) => {
            tracing::warn!(err = %e, %request_id, "results lookup failed");
            error_response(GatewayError::Internal, "results lookup failed").into_response()
        }
    }
}

pub async fn executor_routes(
    State(state): State<Arc<EdgeState>>,
    Query(query): Query<RoutesQuery>,
) -> impl IntoResponse {
    let registry = state.scheduler.registry();
    let managed = registry.list(Pool::Managed, None).await.unwrap_or_default();
    let byon = registry.list(Pool::Byon, Some(query.organization_id)).await.unwrap_or_default();
    let routes = managed.into_iter().chain(byon).collect();
    Json(RoutesResponse { routes })
}

pub async fn sessions_send(
    State(state): State<Arc<EdgeState>>,
    Json(req): Json<SessionSendRequest>,
) -> impl IntoResponse {
    let frame = ToBrainFrame::SessionSend {
        request_id: Uuid::new_v4().to_string(),
        organization_id: req.organization_id,
        user_id: req.user_id,
        session_id: req.session_id,
        user_event_seq: req.user_event_seq,
        message: req.message,
        attachments: req.attachments,
        idempotency_key: req.idempotency_key,
        origin_edge_id: Some(state.edge_id.clone()),
        source: Some("service".to_owned()),
    };
    publish_or_error(&state, &frame).await
}

pub async fn channels_test_send(
    State(state): State<Arc<EdgeState>>,
    Json(req): Json<ChannelTestSendRequest>,
) -> impl IntoResponse {
    let frame = ToBrainFrame::SessionSend {
        request_id: Uuid::new_v4().to_string(),
        organization_id: req.organization_id,
        user_id: req.user_id,
        session_id: req.session_id,
        user_event_seq: req.user_event_seq,
        message: req.message,
        attachments: Vec::new(),
        idempotency_key: None,
        origin_edge_id: Some(state.edge_id.clone()),
        source: Some("channel".to_owned()),
    };
    publish_or_error(&state, &frame).await
}

/// `POST /ingress/channels/:channelId/:accountKey` — delegated to the
/// channel ingress collaborator. Accepted here only to the extent of
/// acknowledging receipt; the collaborator owns verification and routing.
pub async fn ingress_channel(
    Path((channel_id, account_key)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    tracing::info!(%channel_id, %account_key, "channel ingress payload received");
    let _ = body;
    StatusCode::ACCEPTED
}

async fn publish_or_error(state: &Arc<EdgeState>, frame: &ToBrainFrame) -> axum::response::Response {
    let Ok(body) = serde_json::to_value(frame) else {
        return error_response(GatewayError::Internal, "failed to encode frame").into_response();
    };
    match state.bus.append("gateway:bus:to_brain", &body).await {
        Ok(_) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            tracing::error!(err = %e, "failed to publish frame to brain");
            error_response(GatewayError::Internal, "bus unavailable").into_response()
        }
    }
}
