// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tenant-scoped persistent store trait: organizations, sessions, session
//! events, workspaces and secrets. A Postgres implementation backs
//! production; an in-memory fake backs the test suite.

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::StoreError;

use async_trait::async_trait;
use gateway_core::types::{EventLevel, OrgQuotas, Pool, Session, SessionEvent, Workspace, WorkspaceOwner};
use serde_json::Value;
use uuid::Uuid;

/// An organization-scoped secret as the store holds it: still encrypted,
/// never decrypted by anything but the caller holding the KEK.
#[derive(Debug, Clone)]
pub struct EncryptedSecret {
    pub secret_id: Uuid,
    pub organization_id: Uuid,
    pub kind: String,
    pub ciphertext: Vec<u8>,
    pub kek_version: i32,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_org_quotas(&self, organization_id: Uuid) -> Result<OrgQuotas, StoreError>;

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError>;

    async fn save_session_pin(
        &self,
        session_id: Uuid,
        executor_id: Option<Uuid>,
        pool: Option<Pool>,
    ) -> Result<(), StoreError>;

    async fn append_session_event(
        &self,
        session_id: Uuid,
        event_type: &str,
        level: EventLevel,
        payload: Value,
        idempotency_key: Option<String>,
    ) -> Result<SessionEvent, StoreError>;

    async fn recent_session_events(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, StoreError>;

    async fn get_workspace(
        &self,
        organization_id: Uuid,
        owner: &WorkspaceOwner,
    ) -> Result<Option<Workspace>, StoreError>;

    async fn create_workspace(
        &self,
        organization_id: Uuid,
        owner: WorkspaceOwner,
    ) -> Result<Workspace, StoreError>;

    /// Commit a new workspace object if and only if `expected_version`
    /// matches the workspace's current version. Returns `VersionConflict`
    /// otherwise.
    async fn commit_workspace_version(
        &self,
        workspace_id: Uuid,
        expected_version: u64,
        next_object_key: String,
        next_etag: Option<String>,
    ) -> Result<Workspace, StoreError>;

    async fn get_secret(&self, secret_id: Uuid) -> Result<Option<EncryptedSecret>, StoreError>;
}
