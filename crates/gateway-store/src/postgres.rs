// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Postgres-backed `Store`. Out of the hard core this workspace focuses on;
//! sketched here as the real backing for the trait in `lib.rs` rather than
//! fully fleshed out, per the persistent store being an external
//! collaborator.

use async_trait::async_trait;
use chrono::Utc;
use gateway_core::types::{
    EventLevel, OrgQuotas, Pool as ExecutorPool, Session, SessionEvent, Workspace, WorkspaceOwner,
};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{EncryptedSecret, Store, StoreError};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { pool })
    }

    fn event_level_to_str(level: EventLevel) -> &'static str {
        match level {
            EventLevel::Debug => "debug",
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        }
    }

    fn event_level_from_str(raw: &str) -> EventLevel {
        match raw {
            "debug" => EventLevel::Debug,
            "warn" => EventLevel::Warn,
            "error" => EventLevel::Error,
            _ => EventLevel::Info,
        }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn get_org_quotas(&self, organization_id: Uuid) -> Result<OrgQuotas, StoreError> {
        let row = sqlx::query(
            "SELECT max_executor_in_flight FROM organization_settings WHERE organization_id = $1",
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(OrgQuotas {
            max_executor_in_flight: row.and_then(|r| r.get::<Option<i32>, _>(0)).map(|v| v as u32),
        })
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            "SELECT session_id, organization_id, engine_id, llm_provider, llm_model, \
             llm_secret_id, prompt_system, prompt_instructions, tools_allow, limits, \
             memory_provider, executor_selector, pinned_executor_id, pinned_executor_pool, \
             routed_agent_id, session_key, timeout_ms, runtime \
             FROM sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let pinned_executor_pool: Option<String> = row.try_get("pinned_executor_pool").ok();
        let tools_allow_json: Value = row.try_get("tools_allow").unwrap_or(Value::Array(vec![]));
        let limits_json: Value = row.try_get("limits").unwrap_or(Value::Object(Default::default()));
        let selector_json: Option<Value> = row.try_get("executor_selector").ok();

        Ok(Some(Session {
            session_id: row.try_get("session_id")?,
            organization_id: row.try_get("organization_id")?,
            engine_id: row.try_get("engine_id")?,
            llm_provider: row.try_get("llm_provider").ok(),
            llm_model: row.try_get("llm_model").ok(),
            llm_secret_id: row.try_get("llm_secret_id").ok(),
            prompt_system: row.try_get("prompt_system").ok(),
            prompt_instructions: row.try_get("prompt_instructions").ok(),
            tools_allow: serde_json::from_value(tools_allow_json).unwrap_or_default(),
            limits: serde_json::from_value(limits_json).unwrap_or_default(),
            memory_provider: row.try_get("memory_provider").ok(),
            executor_selector: selector_json.and_then(|v| serde_json::from_value(v).ok()),
            pinned_executor_id: row.try_get("pinned_executor_id").ok(),
            pinned_executor_pool: pinned_executor_pool.map(|p| match p.as_str() {
                "byon" => ExecutorPool::Byon,
                _ => ExecutorPool::Managed,
            }),
            routed_agent_id: row.try_get("routed_agent_id").ok(),
            session_key: row.try_get("session_key")?,
            timeout_ms: row.try_get::<i64, _>("timeout_ms")? as u64,
            runtime: row.try_get("runtime").unwrap_or(Value::Object(Default::default())),
        }))
    }

    async fn save_session_pin(
        &self,
        session_id: Uuid,
        executor_id: Option<Uuid>,
        pool: Option<ExecutorPool>,
    ) -> Result<(), StoreError> {
        let pool_str = pool.map(|p| match p {
            ExecutorPool::Managed => "managed",
            ExecutorPool::Byon => "byon",
        });
        sqlx::query(
            "UPDATE sessions SET pinned_executor_id = $1, pinned_executor_pool = $2 \
             WHERE session_id = $3",
        )
        .bind(executor_id)
        .bind(pool_str)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
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
        let mut tx = self.pool.begin().await?;
        let seq: i64 = sqlx::query_scalar(
            "UPDATE sessions SET event_seq = event_seq + 1 WHERE session_id = $1 \
             RETURNING event_seq",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO session_events \
             (session_id, seq, event_type, level, payload, created_at, idempotency_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(session_id)
        .bind(seq)
        .bind(event_type)
        .bind(Self::event_level_to_str(level))
        .bind(&payload)
        .bind(created_at)
        .bind(&idempotency_key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SessionEvent {
            session_id,
            seq: seq as u64,
            event_type: event_type.to_owned(),
            level,
            payload,
            created_at,
            idempotency_key,
        })
    }

    async fn recent_session_events(
        &self,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT session_id, seq, event_type, level, payload, created_at, idempotency_key \
             FROM session_events WHERE session_id = $1 ORDER BY seq DESC LIMIT $2",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut events: Vec<SessionEvent> = rows
            .into_iter()
            .map(|row| SessionEvent {
                session_id: row.get("session_id"),
                seq: row.get::<i64, _>("seq") as u64,
                event_type: row.get("event_type"),
                level: Self::event_level_from_str(row.get("level")),
                payload: row.get("payload"),
                created_at: row.get("created_at"),
                idempotency_key: row.get("idempotency_key"),
            })
            .collect();
        events.reverse();
        Ok(events)
    }

    async fn get_workspace(
        &self,
        organization_id: Uuid,
        owner: &WorkspaceOwner,
    ) -> Result<Option<Workspace>, StoreError> {
        let (owner_type, owner_id) = match owner {
            WorkspaceOwner::Session { session_id } => ("session", *session_id),
            WorkspaceOwner::WorkflowRun { run_id } => ("workflow_run", *run_id),
        };
        let row = sqlx::query(
            "SELECT workspace_id, current_version, current_object_key, current_etag \
             FROM workspaces \
             WHERE organization_id = $1 AND owner_type = $2 AND owner_id = $3",
        )
        .bind(organization_id)
        .bind(owner_type)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Workspace {
            workspace_id: row.get("workspace_id"),
            organization_id,
            owner: owner.clone(),
            current_version: row.get::<i64, _>("current_version") as u64,
            current_object_key: row.get("current_object_key"),
            current_etag: row.get("current_etag"),
        }))
    }

    async fn create_workspace(
        &self,
        organization_id: Uuid,
        owner: WorkspaceOwner,
    ) -> Result<Workspace, StoreError> {
        let (owner_type, owner_id) = match &owner {
            WorkspaceOwner::Session { session_id } => ("session", *session_id),
            WorkspaceOwner::WorkflowRun { run_id } => ("workflow_run", *run_id),
        };
        let workspace_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO workspaces (workspace_id, organization_id, owner_type, owner_id, \
             current_version) VALUES ($1, $2, $3, $4, 0)",
        )
        .bind(workspace_id)
        .bind(organization_id)
        .bind(owner_type)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(Workspace {
            workspace_id,
            organization_id,
            owner,
            current_version: 0,
            current_object_key: None,
            current_etag: None,
        })
    }

    async fn commit_workspace_version(
        &self,
        workspace_id: Uuid,
        expected_version: u64,
        next_object_key: String,
        next_etag: Option<String>,
    ) -> Result<Workspace, StoreError> {
        let row = sqlx::query(
            "UPDATE workspaces SET current_version = current_version + 1, \
             current_object_key = $1, current_etag = $2 \
             WHERE workspace_id = $3 AND current_version = $4 \
             RETURNING organization_id, owner_type, owner_id, current_version",
        )
        .bind(&next_object_key)
        .bind(&next_etag)
        .bind(workspace_id)
        .bind(expected_version as i64)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Err(StoreError::VersionConflict) };

        let owner_type: String = row.get("owner_type");
        let owner_id: Uuid = row.get("owner_id");
        let owner = match owner_type.as_str() {
            "workflow_run" => WorkspaceOwner::WorkflowRun { run_id: owner_id },
            _ => WorkspaceOwner::Session { session_id: owner_id },
        };

        Ok(Workspace {
            workspace_id,
            organization_id: row.get("organization_id"),
            owner,
            current_version: row.get::<i64, _>("current_version") as u64,
            current_object_key: Some(next_object_key),
            current_etag: next_etag,
        })
    }

    async fn get_secret(&self, secret_id: Uuid) -> Result<Option<EncryptedSecret>, StoreError> {
        let row = sqlx::query(
            "SELECT secret_id, organization_id, kind, ciphertext, kek_version \
             FROM secrets WHERE secret_id = $1",
        )
        .bind(secret_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| EncryptedSecret {
            secret_id: row.get("secret_id"),
            organization_id: row.get("organization_id"),
            kind: row.get("kind"),
            ciphertext: row.get("ciphertext"),
            kek_version: row.get("kek_version"),
        }))
    }
}
