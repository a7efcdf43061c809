// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory `Store` fake for tests. Mirrors the invariants a real backend
//! must uphold (strictly increasing event `seq`, commit-if-version-matches)
//! without needing a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use gateway_core::types::{
    EventLevel, OrgQuotas, Pool, Session, SessionEvent, Workspace, WorkspaceOwner,
};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{EncryptedSecret, Store, StoreError};

fn owner_key(owner: &WorkspaceOwner) -> String {
    match owner {
        WorkspaceOwner::Session { session_id } => format!("session:{session_id}"),
        WorkspaceOwner::WorkflowRun { run_id } => format!("workflow_run:{run_id}"),
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    events: RwLock<HashMap<Uuid, Vec<SessionEvent>>>,
    workspaces: RwLock<HashMap<Uuid, Workspace>>,
    workspaces_by_owner: RwLock<HashMap<String, Uuid>>,
    secrets: RwLock<HashMap<Uuid, EncryptedSecret>>,
    org_quotas: RwLock<HashMap<Uuid, OrgQuotas>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_session(&self, session: Session) {
        self.sessions.write().await.insert(session.session_id, session);
    }

    pub async fn insert_secret(&self, secret: EncryptedSecret) {
        self.secrets.write().await.insert(secret.secret_id, secret);
    }

    pub async fn set_org_quotas(&self, organization_id: Uuid, quotas: OrgQuotas) {
        self.org_quotas.write().await.insert(organization_id, quotas);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_org_quotas(&self, organization_id: Uuid) -> Result<OrgQuotas, StoreError> {
        Ok(self
            .org_quotas
            .read()
            .await
            .get(&organization_id)
            .cloned()
            .unwrap_or(OrgQuotas { max_executor_in_flight: None }))
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(&session_id).cloned())
    }

    async fn save_session_pin(
        &self,
        session_id: Uuid,
        executor_id: Option<Uuid>,
        pool: Option<Pool>,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&session_id).ok_or(StoreError::NotFound)?;
        session.pinned_executor_id = executor_id;
        session.pinned_executor_pool = pool;
        Ok(())
    }

    async fn append_session_event(
        &self,
        session_id: Uuid,
        event_type: &str,
        level: EventLevel,
        payload: Value,
        idempotency_key: Option<String>,
    ) -> Result<SessionEvent, StoreError> {
        let mut events = self.events.write().await;
        let log = events.entry(session_id).or_default();
        let seq = log.len() as u64 + 1;
        let event = SessionEvent {
            session_id,
            seq,
            event_type: event_type.to_owned(),
            level,
            payload,
            created_at: Utc::now(),
            idempotency_key,
        };
        log.push(event.clone());
        Ok(event)
    }

    async fn recent_session_events(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, StoreError> {
        let events = self.events.read().await;
        let Some(log) = events.get(&session_id) else { return Ok(vec![]) };
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }

    async fn get_workspace(
        &self,
        organization_id: Uuid,
        owner: &WorkspaceOwner,
    ) -> Result<Option<Workspace>, StoreError> {
        let by_owner = self.workspaces_by_owner.read().await;
        let Some(id) = by_owner.get(&owner_key(owner)) else { return Ok(None) };
        Ok(self
            .workspaces
            .read()
            .await
            .get(id)
            .filter(|w| w.organization_id == organization_id)
            .cloned())
    }

    async fn create_workspace(
        &self,
        organization_id: Uuid,
        owner: WorkspaceOwner,
    ) -> Result<Workspace, StoreError> {
        let workspace = Workspace {
            workspace_id: Uuid::new_v4(),
            organization_id,
            owner: owner.clone(),
            current_version: 0,
            current_object_key: None,
            current_etag: None,
        };
        self.workspaces_by_owner.write().await.insert(owner_key(&owner), workspace.workspace_id);
        self.workspaces.write().await.insert(workspace.workspace_id, workspace.clone());
        Ok(workspace)
    }

    async fn commit_workspace_version(
        &self,
        workspace_id: Uuid,
        expected_version: u64,
        next_object_key: String,
        next_etag: Option<String>,
    ) -> Result<Workspace, StoreError> {
        let mut workspaces = self.workspaces.write().await;
        let workspace = workspaces.get_mut(&workspace_id).ok_or(StoreError::NotFound)?;
        if workspace.current_version != expected_version {
            return Err(StoreError::VersionConflict);
        }
        workspace.current_version += 1;
        workspace.current_object_key = Some(next_object_key);
        workspace.current_etag = next_etag;
        Ok(workspace.clone())
    }

    async fn get_secret(&self, secret_id: Uuid) -> Result<Option<EncryptedSecret>, StoreError> {
        Ok(self.secrets.read().await.get(&secret_id).cloned())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
