// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain types shared across the bus, scheduler, workspace, edge and brain
//! crates.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An executor's identity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    Managed,
    Byon,
}

/// A `kind` an executor can service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    ConnectorAction,
    AgentExecute,
    AgentRun,
}

/// Per-engine OAuth verification state reported by an executor's hello.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineAuthState {
    pub oauth_verified: bool,
    pub checked_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// A live executor registration, as tracked by the scheduler's route
/// registry. This is the serialized projection written to the TTL'd route
/// key; absence of the key means the executor is not selectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorRoute {
    pub executor_id: Uuid,
    pub pool: Pool,
    /// Required for `Pool::Byon`, absent for `Pool::Managed`.
    pub organization_id: Option<Uuid>,
    pub edge_id: String,
    pub labels: BTreeSet<String>,
    pub kinds: BTreeSet<ExecutorKind>,
    pub max_in_flight: u32,
    pub engine_auth: BTreeMap<String, EngineAuthState>,
    pub last_seen_ms: i64,
    pub last_used_ms: i64,
}

impl ExecutorRoute {
    pub fn is_oauth_verified(&self, engine: &str) -> bool {
        self.engine_auth.get(engine).map(|s| s.oauth_verified).unwrap_or(false)
    }
}

/// A predicate narrowing candidate executors for selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSelector {
    pub pool: Option<Pool>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub group: Option<String>,
    pub tag: Option<String>,
    pub executor_id: Option<Uuid>,
}

/// Per-numeric-field session limits, kept as an open map so new limits don't
/// require a schema migration here.
pub type SessionLimits = BTreeMap<String, i64>;

/// A persistent interactive session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub organization_id: Uuid,
    pub engine_id: String,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub llm_secret_id: Option<Uuid>,
    pub prompt_system: Option<String>,
    pub prompt_instructions: Option<String>,
    pub tools_allow: Vec<String>,
    pub limits: SessionLimits,
    pub memory_provider: Option<String>,
    pub executor_selector: Option<ExecutorSelector>,
    pub pinned_executor_id: Option<Uuid>,
    pub pinned_executor_pool: Option<Pool>,
    pub routed_agent_id: Option<Uuid>,
    pub session_key: String,
    pub timeout_ms: u64,
    pub runtime: serde_json::Value,
}

/// Severity of a session event, mirrored into the log line emitted for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One entry in a session's append-only event log. `seq` is assigned by the
/// store on append and must be strictly increasing per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: Uuid,
    pub seq: u64,
    pub event_type: String,
    pub level: EventLevel,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}

/// Owner of a workspace blob: either an interactive session or a workflow
/// run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkspaceOwner {
    Session { session_id: Uuid },
    WorkflowRun { run_id: Uuid },
}

/// A versioned workspace blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub workspace_id: Uuid,
    pub organization_id: Uuid,
    pub owner: WorkspaceOwner,
    pub current_version: u64,
    pub current_object_key: Option<String>,
    pub current_etag: Option<String>,
}

/// Outcome status carried by a reply envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Succeeded,
    Failed,
}

/// The payload stored under `reply:<requestId>` until a waiter collects it
/// or the TTL expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceCommit>,
}

/// The workspace-commit fragment of a reply, when the invocation mutated a
/// workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceCommit {
    pub workspace_id: Uuid,
    pub version: u64,
    pub object_key: String,
    pub etag: Option<String>,
}

/// Read-through projection of an organization's execution quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgQuotas {
    pub max_executor_in_flight: Option<u32>,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
