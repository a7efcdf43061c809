// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handling for `workflow_dispatch` frames: `agent.execute`/`connector.action`
//! go straight through `invokeToolOnExecutor`; `agent.run` additionally
//! resolves tenant secrets and determines whether the chosen executor must
//! already hold a verified OAuth grant for the session engine.

use std::sync::Arc;

use gateway_core::engine::EngineId;
use gateway_core::error::GatewayError;
use gateway_core::frame::{apply_job_id, Dispatch, DispatchKind};
use gateway_core::types::{ExecutorKind, ExecutorSelector, Pool, ReplyEnvelope, ReplyStatus, WorkspaceOwner};
use gateway_workspace::InvokeRequest;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::state::BrainState;

pub async fn handle(state: &Arc<BrainState>, request_id: String, dispatch: Dispatch, is_async: bool) {
    let result = match dispatch.kind {
        DispatchKind::AgentExecute | DispatchKind::ConnectorAction => run_tool_dispatch(state, &dispatch).await,
        DispatchKind::AgentRun => run_agent_run_dispatch(state, &dispatch).await,
    };

    let envelope = result.unwrap_or_else(failed_envelope);
    let response_body = serde_json::json!({ "requestId": request_id, "response": envelope });

    if let Err(e) = state.results.put_reply(&request_id, &envelope, state.config.results_ttl()).await {
        tracing::error!(err = %e, %request_id, "failed to write reply key");
    }
    if let Err(e) =
        state.results.put_dispatch_response(&request_id, &response_body, state.config.results_ttl()).await
    {
        tracing::error!(err = %e, %request_id, "failed to cache dispatch response");
    }

    if is_async {
        enqueue_continuation(state, &request_id, &dispatch, &envelope).await;
    }
}

fn failed_envelope(err: GatewayError) -> ReplyEnvelope {
    ReplyEnvelope {
        status: ReplyStatus::Failed,
        output: None,
        error: Some(err.as_str().to_owned()),
        content: None,
        workspace: None,
    }
}

fn executor_kind(kind: DispatchKind) -> ExecutorKind {
    match kind {
        DispatchKind::AgentExecute => ExecutorKind::AgentExecute,
        DispatchKind::ConnectorAction => ExecutorKind::ConnectorAction,
        DispatchKind::AgentRun => ExecutorKind::AgentRun,
    }
}

async fn run_tool_dispatch(state: &Arc<BrainState>, dispatch: &Dispatch) -> Result<ReplyEnvelope, GatewayError> {
    state
        .coordinator
        .invoke_tool_on_executor(InvokeRequest {
            organization_id: dispatch.organization_id,
            owner: WorkspaceOwner::WorkflowRun { run_id: dispatch.run_id },
            pool_order: vec![Pool::Managed],
            selector: ExecutorSelector::default(),
            kind: executor_kind(dispatch.kind),
            required_engine: None,
            timeout_ms: state.config.dispatch_timeout_ms,
            network_mode: "none".to_owned(),
            output_max_chars: state.config.tool_output_max_chars,
            payload: dispatch.payload.clone(),
        })
        .await
}

fn validate_agent_run_payload(payload: &Map<String, Value>) -> Result<(), GatewayError> {
    if !payload.contains_key("node") {
        return Err(GatewayError::InvalidAgentRunPayload);
    }
    let env = payload.get("env").and_then(Value::as_object).ok_or(GatewayError::InvalidAgentRunPayload)?;
    if !env.get("githubApiBaseUrl").is_some_and(Value::is_string) {
        return Err(GatewayError::InvalidAgentRunPayload);
    }
    Ok(())
}

/// Decrypt `engineSecretId` (if present) and every id in `secretRefs` with
/// the process KEK, inlining the plaintext into the payload the executor
/// receives. Returns whether an inline engine secret was resolved, which
/// exempts the dispatch from the executor-OAuth requirement.
async fn resolve_secrets(
    state: &Arc<BrainState>,
    organization_id: Uuid,
    payload: &mut Map<String, Value>,
    secret_refs: &[Uuid],
) -> Result<bool, GatewayError> {
    let mut inline_engine_secret = false;

    if let Some(engine_secret_id) =
        payload.get("engineSecretId").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok())
    {
        let plaintext = decrypt_secret(state, organization_id, engine_secret_id).await?;
        payload.insert("engineSecret".into(), Value::String(plaintext));
        payload.remove("engineSecretId");
        inline_engine_secret = true;
    }

    if !secret_refs.is_empty() {
        let mut resolved = Map::new();
        for secret_id in secret_refs {
            let plaintext = decrypt_secret(state, organization_id, *secret_id).await?;
            resolved.insert(secret_id.to_string(), Value::String(plaintext));
        }
        payload.insert("secrets".into(), Value::Object(resolved));
    }

    Ok(inline_engine_secret)
}

async fn decrypt_secret(state: &Arc<BrainState>, organization_id: Uuid, secret_id: Uuid) -> Result<String, GatewayError> {
    let kek = state.kek.as_ref().ok_or(GatewayError::Internal)?;
    let secret = state.store.get_secret(secret_id).await.map_err(|_| GatewayError::Internal)?;
    let secret = secret.ok_or(GatewayError::Internal)?;
    if secret.organization_id != organization_id {
        return Err(GatewayError::Internal);
    }
    kek.decrypt_to_string(&secret).map_err(|_| GatewayError::Internal)
}

async fn run_agent_run_dispatch(state: &Arc<BrainState>, dispatch: &Dispatch) -> Result<ReplyEnvelope, GatewayError> {
    let mut payload = dispatch.payload.as_object().cloned().ok_or(GatewayError::InvalidAgentRunPayload)?;
    validate_agent_run_payload(&payload)?;

    payload.insert("nodeId".into(), Value::String(dispatch.node_id.clone()));
    payload.insert("runId".into(), Value::String(dispatch.run_id.to_string()));
    payload.insert("workflowId".into(), Value::String(dispatch.workflow_id.to_string()));
    payload.insert("attemptCount".into(), Value::from(dispatch.attempt_count));

    let engine_id = payload
        .get("engineId")
        .and_then(Value::as_str)
        .and_then(EngineId::parse)
        .ok_or(GatewayError::ExecutorUnsupportedEngine)?;

    let inline_engine_secret =
        resolve_secrets(state, dispatch.organization_id, &mut payload, &dispatch.secret_refs).await?;
    let oauth_required = engine_id.requires_executor_oauth() && !inline_engine_secret;

    let network_mode = payload.get("networkMode").and_then(Value::as_str).unwrap_or("none").to_owned();

    state
        .coordinator
        .invoke_tool_on_executor(InvokeRequest {
            organization_id: dispatch.organization_id,
            owner: WorkspaceOwner::WorkflowRun { run_id: dispatch.run_id },
            pool_order: vec![Pool::Managed],
            selector: ExecutorSelector::default(),
            kind: ExecutorKind::AgentRun,
            required_engine: oauth_required.then(|| engine_id.as_str().to_owned()),
            timeout_ms: state.config.dispatch_timeout_ms,
            network_mode,
            output_max_chars: state.config.tool_output_max_chars,
            payload: Value::Object(payload),
        })
        .await
}

async fn enqueue_continuation(state: &Arc<BrainState>, request_id: &str, dispatch: &Dispatch, envelope: &ReplyEnvelope) {
    let job_id = apply_job_id(request_id);
    let dedup_key = format!("continuation:dedup:{job_id}");
    match state.bus.kv_set_nx(&dedup_key, "1", state.config.results_ttl()).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            tracing::warn!(err = %e, %job_id, "continuation dedup check failed");
            return;
        }
    }

    let job = serde_json::json!({
        "type": "remote.apply",
        "jobId": job_id,
        "organizationId": dispatch.organization_id,
        "workflowId": dispatch.workflow_id,
        "runId": dispatch.run_id,
        "requestId": request_id,
        "attemptCount": dispatch.attempt_count,
        "result": envelope,
    });
    if let Err(e) = state.bus.append(&state.config.workflow_continuation_queue_name, &job).await {
        tracing::error!(err = %e, %job_id, "failed to enqueue workflow continuation job");
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
