// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consumes `gateway:bus:to_brain` with consumer group `brain`. Every
//! delivery is dispatched to its own task so a long-running session turn
//! never blocks the read loop; the task acks on completion, success or
//! mapped failure alike, so only a crash (never a handled error) leaves a
//! delivery for at-least-once redelivery.

use std::sync::Arc;

use gateway_core::frame::ToBrainFrame;

use crate::state::BrainState;
use crate::{dispatch, session};

const STREAM: &str = "gateway:bus:to_brain";
const CONSUMER_GROUP: &str = "brain";
const BLOCK_MS: u64 = 2_000;
const BATCH_SIZE: usize = 16;

pub fn spawn(state: Arc<BrainState>) {
    tokio::spawn(async move { run(state).await });
}

async fn run(state: Arc<BrainState>) {
    let consumer = format!(
        "{}-{}",
        hostname_or_fallback(),
        std::process::id(),
    );

    if let Err(e) = state.bus.ensure_group(STREAM, CONSUMER_GROUP).await {
        tracing::error!(err = %e, "failed to create to_brain consumer group");
        return;
    }

    loop {
        if state.shutdown.is_cancelled() {
            break;
        }

        let batch = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            result = state.bus.read_group(STREAM, CONSUMER_GROUP, &consumer, BATCH_SIZE, BLOCK_MS) => result,
        };

        let deliveries = match batch {
            Ok(deliveries) => deliveries,
            Err(e) => {
                tracing::warn!(err = %e, "to_brain read_group failed");
                continue;
            }
        };

        for delivery in deliveries {
            let state = Arc::clone(&state);
            let shutdown_for_task = state.shutdown.clone();
            tokio::spawn(async move {
                handle(&state, shutdown_for_task, &delivery.message).await;
                if let Err(e) = state.bus.ack(STREAM, CONSUMER_GROUP, &delivery.id).await {
                    tracing::warn!(err = %e, id = %delivery.id, "failed to ack to_brain delivery");
                }
            });
        }
    }
}

fn hostname_or_fallback() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "brain".to_owned())
}

async fn handle(state: &Arc<BrainState>, shutdown: tokio_util::sync::CancellationToken, message: &serde_json::Value) {
    let frame: ToBrainFrame = match serde_json::from_value(message.clone()) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(err = %e, "undecodable to_brain frame");
            return;
        }
    };

    match frame {
        ToBrainFrame::WorkflowDispatch { request_id, dispatch, is_async } => {
            tracing::debug!(%request_id, "workflow_dispatch received");
            dispatch::handle(state, request_id, dispatch, is_async).await;
        }
        ToBrainFrame::SessionSend {
            request_id,
            organization_id,
            user_id,
            session_id,
            user_event_seq,
            message,
            attachments,
            idempotency_key,
            origin_edge_id,
            source,
        } => {
            tracing::debug!(%request_id, %session_id, "session_send received");
            session::handle_send(
                state,
                shutdown,
                session::SessionSend {
                    request_id,
                    organization_id,
                    user_id,
                    session_id,
                    user_event_seq,
                    message,
                    attachments,
                    idempotency_key,
                    origin_edge_id,
                    source,
                },
            )
            .await;
        }
        ToBrainFrame::SessionReset { session_id, mode, .. } => {
            tracing::debug!(%session_id, %mode, "session_reset received");
            session::handle_reset(state, session_id, mode).await;
        }
        ToBrainFrame::SessionCancel { session_id, organization_id, .. } => {
            tracing::debug!(%session_id, "session_cancel received");
            session::handle_cancel(state, session_id, organization_id).await;
        }
        ToBrainFrame::ExecutorEvent { executor_id, event } => {
            tracing::debug!(%executor_id, "executor_event passthrough");
            let _ = event;
        }
    }
}
