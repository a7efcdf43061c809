// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `invokeToolOnExecutor`: the workspace-coordinated tool invocation flow.
//! Ties together quota lookup, executor selection, the advisory workspace
//! lock, pre-signed object access and the reply wait into the one operation
//! both workflow dispatch and session turns drive a tool call through.

use std::sync::Arc;
use std::time::Duration;

use gateway_bus::Bus;
use gateway_core::error::GatewayError;
use gateway_core::frame::{
    InvokeToolV2, MountSpec, ToEdgeFrame, ToolPolicy, WorkspaceAccess, WorkspaceRef, WorkspaceUpload,
};
use gateway_core::types::{ExecutorKind, ExecutorSelector, Pool, ReplyEnvelope, Workspace, WorkspaceOwner};
use gateway_scheduler::{Scheduler, SelectionRequest};
use gateway_store::Store;
use rand::Rng;
use serde_json::Value;
use uuid::Uuid;

use crate::lock::WorkspaceLock;
use crate::object_store::ObjectStore;
use crate::quota::QuotaCache;

/// What the caller (workflow dispatch or a session turn) wants run.
pub struct InvokeRequest {
    pub organization_id: Uuid,
    pub owner: WorkspaceOwner,
    pub pool_order: Vec<Pool>,
    pub selector: ExecutorSelector,
    pub kind: ExecutorKind,
    pub required_engine: Option<String>,
    pub timeout_ms: u64,
    pub network_mode: String,
    pub output_max_chars: u32,
    pub payload: Value,
}

pub struct WorkspaceCoordinator {
    bus: Arc<dyn Bus>,
    store: Arc<dyn Store>,
    scheduler: Arc<Scheduler>,
    results: Arc<gateway_results::ResultsCache>,
    object_store: Arc<dyn ObjectStore>,
    lock: WorkspaceLock,
    quotas: QuotaCache,
}

fn lock_ttl(timeout_ms: u64) -> Duration {
    let timeout_backed = timeout_ms.div_ceil(1000) + 30;
    Duration::from_secs(timeout_backed.max(30))
}

fn invoke_request_id(owner_id: Uuid) -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill(&mut bytes);
    let suffix: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{owner_id}:{suffix}")
}

impl WorkspaceCoordinator {
    pub fn new(
        bus: Arc<dyn Bus>,
        store: Arc<dyn Store>,
        scheduler: Arc<Scheduler>,
        results: Arc<gateway_results::ResultsCache>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            bus: Arc::clone(&bus),
            store: Arc::clone(&store),
            scheduler,
            results,
            object_store,
            lock: WorkspaceLock::new(bus),
            quotas: QuotaCache::new(store),
        }
    }

    /// Override the org-quota cache's TTL and fallback cap. Brain wires this
    /// from `GATEWAY_ORG_QUOTA_CACHE_TTL_MS` / `GATEWAY_ORG_MAX_INFLIGHT`.
    pub fn with_quota_config(mut self, ttl: Duration, default_cap: u32) -> Self {
        self.quotas = QuotaCache::configured(Arc::clone(&self.store), ttl, default_cap);
        self
    }

    pub async fn invoke_tool_on_executor(
        &self,
        request: InvokeRequest,
    ) -> Result<ReplyEnvelope, GatewayError> {
        // 1. org quota
        let org_cap = self.quotas.get(request.organization_id).await.map_err(|_| GatewayError::Internal)?;

        // 2. select an executor
        let route = self
            .scheduler
            .select(SelectionRequest {
                pool_order: &request.pool_order,
                organization_id: request.organization_id,
                selector: &request.selector,
                kind: request.kind,
                required_engine: request.required_engine.as_deref(),
                org_cap,
                reservation_ttl: Duration::from_millis(request.timeout_ms + 30_000),
            })
            .await?;

        let executor_id = route.executor_id;
        let edge_id = route.edge_id.clone();

        // 3. load or create the workspace
        let workspace = match self.store.get_workspace(request.organization_id, &request.owner).await {
            Ok(Some(ws)) => ws,
            Ok(None) => match self
                .store
                .create_workspace(request.organization_id, request.owner.clone())
                .await
            {
                Ok(ws) => ws,
                Err(_) => {
                    let _ = self.scheduler.release(executor_id, request.organization_id).await;
                    return Err(GatewayError::Internal);
                }
            },
            Err(_) => {
                let _ = self.scheduler.release(executor_id, request.organization_id).await;
                return Err(GatewayError::Internal);
            }
        };

        // 4. advisory lock
        let ttl = lock_ttl(request.timeout_ms);
        let token = match self.lock.acquire(workspace.workspace_id, ttl).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                let _ = self.scheduler.release(executor_id, request.organization_id).await;
                return Err(GatewayError::WorkspaceLocked);
            }
            Err(_) => {
                let _ = self.scheduler.release(executor_id, request.organization_id).await;
                return Err(GatewayError::Internal);
            }
        };

        let outcome = self.run_invocation(&request, &executor_id, &edge_id, &workspace).await;

        // 9. finally: release capacity and the lock, in that order, always.
        let _ = self.scheduler.release(executor_id, request.organization_id).await;
        let _ = self.lock.release(workspace.workspace_id, &token).await;

        outcome
    }

    async fn run_invocation(
        &self,
        request: &InvokeRequest,
        executor_id: &Uuid,
        edge_id: &str,
        workspace: &Workspace,
    ) -> Result<ReplyEnvelope, GatewayError> {
        // 5. compute versions, pre-sign access
        let expected_version = workspace.current_version;
        let next_version = expected_version + 1;
        let next_object_key = format!("workspaces/{}/v{next_version}", workspace.workspace_id);

        let download_url = match &workspace.current_object_key {
            Some(key) => Some(
                self.object_store.presign_download(request.organization_id, key).await?,
            ),
            None => None,
        };
        let upload_url =
            self.object_store.presign_upload(request.organization_id, &next_object_key).await?;

        // 6. send invoke_tool_v2 on the executor's edge stream
        let request_id = invoke_request_id(workspace_owner_id(&request.owner));
        let invoke = InvokeToolV2 {
            request_id: request_id.clone(),
            tool_policy: ToolPolicy {
                network_mode_default_deny: true,
                network_mode: request.network_mode.clone(),
                timeout_ms: request.timeout_ms,
                output_max_chars: request.output_max_chars,
                mounts_allowlist: vec![
                    MountSpec { path: "/work".into(), mode: "rw".into() },
                    MountSpec { path: "/tmp".into(), mode: "rw".into() },
                ],
            },
            workspace: WorkspaceRef {
                workspace_id: workspace.workspace_id,
                version: expected_version,
                object_key: workspace.current_object_key.clone(),
                etag: workspace.current_etag.clone(),
            },
            workspace_access: Some(WorkspaceAccess {
                download_url,
                upload: WorkspaceUpload { url: upload_url, object_key: next_object_key, version: next_version },
            }),
            payload: request.payload.clone(),
        };

        let frame = ToEdgeFrame::ExecutorInvoke { executor_id: *executor_id, invoke };
        let stream = format!("gateway:bus:to_edge:{edge_id}");
        let body = serde_json::to_value(&frame).map_err(|_| GatewayError::Internal)?;
        self.bus.append(&stream, &body).await.map_err(|_| GatewayError::Internal)?;

        // 7. await reply
        let reply = self
            .results
            .await_reply(&request_id, Duration::from_millis(request.timeout_ms))
            .await
            .map_err(|_| GatewayError::NodeExecutionTimeout)?;

        // 8. conditional commit
        if let Some(commit) = &reply.workspace {
            self.store
                .commit_workspace_version(
                    workspace.workspace_id,
                    expected_version,
                    commit.object_key.clone(),
                    commit.etag.clone(),
                )
                .await
                .map_err(|e| match e {
                    gateway_store::StoreError::VersionConflict => GatewayError::WorkspaceVersionConflict,
                    _ => GatewayError::Internal,
                })?;
        }

        Ok(reply)
    }
}

fn workspace_owner_id(owner: &WorkspaceOwner) -> Uuid {
    match owner {
        WorkspaceOwner::Session { session_id } => *session_id,
        WorkspaceOwner::WorkflowRun { run_id } => *run_id,
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
