// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire envelopes exchanged over the bus and over executor WebSockets.
//!
//! Both the legacy and v2 session-event shapes are first-class here: the
//! brain emits both for every session turn until consumers finish migrating
//! off the legacy frames (see the open question in `DESIGN.md`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A dispatch request handed to the brain over `gateway:bus:to_brain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    pub kind: DispatchKind,
    pub organization_id: Uuid,
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub node_id: String,
    pub attempt_count: u32,
    pub payload: Value,
    #[serde(default)]
    pub secret_refs: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    AgentExecute,
    ConnectorAction,
    AgentRun,
}

/// Compute the idempotency key a retried dispatch with the same
/// `(run_id, node_id, attempt_count)` always resolves to.
pub fn dispatch_request_id(run_id: Uuid, node_id: &str, attempt_count: u32) -> String {
    format!("{run_id}:{node_id}:{attempt_count}")
}

/// Compute the deduplicated continuation job id for a completed dispatch.
pub fn apply_job_id(request_id: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(request_id.as_bytes());
    format!("apply-{digest:x}")
}

/// Edge → brain: `gateway:bus:to_brain` frame variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToBrainFrame {
    WorkflowDispatch { request_id: String, dispatch: Dispatch, is_async: bool },
    SessionSend {
        request_id: String,
        organization_id: Uuid,
        user_id: Uuid,
        session_id: Uuid,
        user_event_seq: u64,
        message: Option<String>,
        #[serde(default)]
        attachments: Vec<Value>,
        idempotency_key: Option<String>,
        origin_edge_id: Option<String>,
        source: Option<String>,
    },
    SessionReset {
        request_id: String,
        organization_id: Uuid,
        user_id: Uuid,
        session_id: Uuid,
        mode: String,
        origin_edge_id: Option<String>,
    },
    SessionCancel {
        request_id: String,
        organization_id: Uuid,
        user_id: Uuid,
        session_id: Uuid,
        origin_edge_id: Option<String>,
    },
    ExecutorEvent { executor_id: Uuid, event: Value },
}

/// Brain → edge: `gateway:bus:to_edge:<edgeId>` frame variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToEdgeFrame {
    ExecutorInvoke { executor_id: Uuid, invoke: InvokeToolV2 },
    ExecutorSession { executor_id: Uuid, payload: ExecutorSessionPayload },
    ClientBroadcast { session_id: Uuid, event: Value },
    WorkflowReply { request_id: String, response: Value },
    ChannelOutbound {
        organization_id: Uuid,
        session_id: Uuid,
        session_event_seq: u64,
        source: String,
        text: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorSessionPayload {
    SessionOpen { request_id: String, session_config: Value },
    SessionTurn { request_id: String, message: Option<String>, attachments: Vec<Value> },
    SessionCancel { request_id: String },
}

/// Tool policy forwarded with every `invoke_tool_v2` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPolicy {
    pub network_mode_default_deny: bool,
    pub network_mode: String,
    pub timeout_ms: u64,
    pub output_max_chars: u32,
    pub mounts_allowlist: Vec<MountSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountSpec {
    pub path: String,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRef {
    pub workspace_id: Uuid,
    pub version: u64,
    pub object_key: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceUpload {
    pub url: String,
    pub object_key: String,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceAccess {
    pub download_url: Option<String>,
    pub upload: WorkspaceUpload,
}

/// Edge → executor: a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeToolV2 {
    pub request_id: String,
    pub tool_policy: ToolPolicy,
    pub workspace: WorkspaceRef,
    pub workspace_access: Option<WorkspaceAccess>,
    pub payload: Value,
}

/// Executor → edge frame variants, keyed by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FromExecutorFrame {
    ExecutorHelloV2 { capabilities: Value },
    ToolResultV2 { request_id: String, result: Value },
    ToolEventV2 { request_id: String, event: Value },
    SessionOpened { request_id: String, ok: bool, error: Option<String> },
    TurnFinal { request_id: String, message: Option<String>, output: Option<Value> },
    TurnError { request_id: String, code: String, message: Option<String> },
    MemorySyncResult { request_id: String, result: Value },
    MemoryQueryResult { request_id: String, result: Value },
}

/// The v2 structured session event broadcast to joined clients, alongside
/// its legacy counterpart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEventV2 {
    pub session_id: Uuid,
    pub seq: u64,
    pub event_type: String,
    pub payload: Value,
}

/// A legacy raw frame emitted for backward-compatible clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LegacyFrame {
    AgentDelta { session_id: Uuid, message: String },
    AgentFinal { session_id: Uuid, message: String, output: Option<Value> },
    SessionState { session_id: Uuid, pinned_executor_id: Option<Uuid> },
    SessionError { session_id: Uuid, code: String, message: String },
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
