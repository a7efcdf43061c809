// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consumes this edge's `gateway:bus:to_edge:<edgeId>` stream and drives the
//! local effect each frame variant names: forwarding a command to an
//! executor socket, rebroadcasting to joined clients, or handing a workflow
//! reply/channel message onward.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use gateway_bus::Bus;
use gateway_core::frame::{ExecutorSessionPayload, ToEdgeFrame};
use gateway_core::types::{ReplyEnvelope, ReplyStatus};

use crate::state::EdgeState;

const CONSUMER_GROUP: &str = "edge";
const BLOCK_MS: u64 = 2_000;
const BATCH_SIZE: usize = 16;

pub fn spawn(state: Arc<EdgeState>) {
    tokio::spawn(async move { run(state).await });
}

async fn run(state: Arc<EdgeState>) {
    let stream = state.to_edge_stream();
    let consumer = format!("{}-{}", state.edge_id, std::process::id());

    if let Err(e) = state.bus.ensure_group(&stream, CONSUMER_GROUP).await {
        tracing::error!(err = %e, "failed to create to_edge consumer group");
        return;
    }

    loop {
        if state.shutdown.is_cancelled() {
            break;
        }

        let batch = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            result = state.bus.read_group(&stream, CONSUMER_GROUP, &consumer, BATCH_SIZE, BLOCK_MS) => result,
        };

        let deliveries = match batch {
            Ok(deliveries) => deliveries,
            Err(e) => {
                tracing::warn!(err = %e, "to_edge read_group failed");
                continue;
            }
        };

        for delivery in deliveries {
            let state = Arc::clone(&state);
            let stream = stream.clone();
            tokio::spawn(async move {
                handle(&state, &delivery.message).await;
                if let Err(e) = state.bus.ack(&stream, CONSUMER_GROUP, &delivery.id).await {
                    tracing::warn!(err = %e, id = %delivery.id, "failed to ack to_edge delivery");
                }
            });
        }
    }
}

async fn handle(state: &Arc<EdgeState>, message: &serde_json::Value) {
    let frame: ToEdgeFrame = match serde_json::from_value(message.clone()) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(err = %e, "undecodable to_edge frame");
            return;
        }
    };

    match frame {
        ToEdgeFrame::ExecutorInvoke { executor_id, invoke } => {
            let request_id = invoke.request_id.clone();
            let body = serde_json::json!({"type": "invoke_tool_v2", "invoke": invoke});
            if !state.send_to_executor(executor_id, Message::Text(body.to_string().into())).await {
                state.deregister_executor_socket(executor_id).await;
                let envelope = ReplyEnvelope {
                    status: ReplyStatus::Failed,
                    output: None,
                    error: Some("NO_AGENT_AVAILABLE".to_owned()),
                    content: None,
                    workspace: None,
                };
                let _ = state.results.put_reply(&request_id, &envelope, Duration::from_secs(60)).await;
            }
        }
        ToEdgeFrame::ExecutorSession { executor_id, payload } => {
            let (kind, body) = match &payload {
                ExecutorSessionPayload::SessionOpen { .. } => ("session_open", &payload),
                ExecutorSessionPayload::SessionTurn { .. } => ("session_turn", &payload),
                ExecutorSessionPayload::SessionCancel { .. } => ("session_cancel", &payload),
            };
            let body = serde_json::json!({"type": kind, "payload": body});
            if !state.send_to_executor(executor_id, Message::Text(body.to_string().into())).await {
                state.deregister_executor_socket(executor_id).await;
            }
        }
        ToEdgeFrame::ClientBroadcast { session_id, event } => {
            state.session_broadcast(session_id, event).await;
        }
        ToEdgeFrame::WorkflowReply { request_id, response } => {
            let ttl = state.config.results_ttl();
            if let Err(e) = state.results.put_dispatch_response(&request_id, &response, ttl).await {
                tracing::warn!(err = %e, %request_id, "failed to cache workflow reply");
            }
        }
        ToEdgeFrame::ChannelOutbound { organization_id, session_id, session_event_seq, source, text } => {
            tracing::info!(
                %organization_id, %session_id, session_event_seq, %source,
                len = text.len(),
                "channel_outbound handed to ingress collaborator"
            );
        }
    }
}
