// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor route registry: a TTL'd directory of live executors, backed by
//! the bus's key/value and set primitives so any edge or brain process sees
//! the same view.

use std::sync::Arc;
use std::time::Duration;

use gateway_bus::Bus;
use gateway_core::types::{ExecutorRoute, Pool};
use uuid::Uuid;

use crate::error::SchedulerError;

fn route_key(executor_id: Uuid) -> String {
    format!("executor:route:{executor_id}")
}

fn pool_index_key(pool: Pool, organization_id: Option<Uuid>) -> String {
    match pool {
        Pool::Managed => "executors:pool:managed".to_owned(),
        Pool::Byon => {
            let org = organization_id.unwrap_or(Uuid::nil());
            format!("executors:pool:byon:{org}")
        }
    }
}

/// Registry of live executor routes, shared across edge and brain
/// processes through the bus.
pub struct RouteRegistry {
    bus: Arc<dyn Bus>,
    ttl: Duration,
}

impl RouteRegistry {
    pub fn new(bus: Arc<dyn Bus>, ttl: Duration) -> Self {
        Self { bus, ttl }
    }

    /// Register or refresh an executor's route. BYON routes additionally
    /// require `organization_id` to be set on the route.
    pub async fn register(&self, route: &ExecutorRoute) -> Result<(), SchedulerError> {
        let body = serde_json::to_string(route)
            .map_err(|e| SchedulerError::Serialization(e.to_string()))?;
        self.bus.kv_set(&route_key(route.executor_id), &body, self.ttl).await?;
        let index = pool_index_key(route.pool, route.organization_id);
        self.bus.set_add(&index, &route.executor_id.to_string(), self.ttl).await?;
        Ok(())
    }

    pub async fn deregister(
        &self,
        executor_id: Uuid,
        pool: Pool,
        organization_id: Option<Uuid>,
    ) -> Result<(), SchedulerError> {
        self.bus.kv_del(&route_key(executor_id)).await?;
        self.bus
            .set_remove(&pool_index_key(pool, organization_id), &executor_id.to_string())
            .await?;
        Ok(())
    }

    pub async fn get(&self, executor_id: Uuid) -> Result<Option<ExecutorRoute>, SchedulerError> {
        let Some(raw) = self.bus.kv_get(&route_key(executor_id)).await? else {
            return Ok(None);
        };
        let route = serde_json::from_str(&raw)
            .map_err(|e| SchedulerError::Serialization(e.to_string()))?;
        Ok(Some(route))
    }

    /// List all fresh routes registered for a pool. For `Pool::Byon`,
    /// `organization_id` must be provided and scopes the listing to that
    /// tenant; routes whose TTL has lapsed are silently absent (the route
    /// key is gone even though the index member may briefly linger).
    pub async fn list(
        &self,
        pool: Pool,
        organization_id: Option<Uuid>,
    ) -> Result<Vec<ExecutorRoute>, SchedulerError> {
        let members = self.bus.set_members(&pool_index_key(pool, organization_id)).await?;
        let mut routes = Vec::with_capacity(members.len());
        for member in members {
            let Ok(executor_id) = member.parse::<Uuid>() else { continue };
            if let Some(route) = self.get(executor_id).await? {
                routes.push(route);
            }
        }
        Ok(routes)
    }

    /// Best-effort update of `last_used_ms` after a successful reservation.
    /// Losing this update to a race is harmless: it only perturbs selection
    /// tie-breaking, never correctness.
    pub async fn mark_used(&self, route: &ExecutorRoute) -> Result<(), SchedulerError> {
        let mut updated = route.clone();
        updated.last_used_ms = now_ms();
        self.register(&updated).await
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
