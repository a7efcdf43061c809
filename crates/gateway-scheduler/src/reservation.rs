// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic dual-cap reservation of executor and organization in-flight
//! capacity, with a TTL backstop against leaked increments.

use std::sync::Arc;
use std::time::Duration;

use gateway_bus::Bus;
use uuid::Uuid;

use crate::error::SchedulerError;

fn executor_key(executor_id: Uuid) -> String {
    format!("inflight:executor:{executor_id}")
}

fn org_key(organization_id: Uuid) -> String {
    format!("inflight:org:{organization_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    ExecutorOverCapacity,
    OrgQuotaExceeded,
}

pub struct Reservations {
    bus: Arc<dyn Bus>,
}

impl Reservations {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    pub async fn in_flight(&self, executor_id: Uuid) -> Result<i64, SchedulerError> {
        Ok(self
            .bus
            .kv_get(&executor_key(executor_id))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub async fn org_in_flight(&self, organization_id: Uuid) -> Result<i64, SchedulerError> {
        Ok(self
            .bus
            .kv_get(&org_key(organization_id))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Reserve one slot against both the executor's and the organization's
    /// in-flight caps. The increment is atomic per-key; if the org increment
    /// fails after the executor increment already succeeded, the executor
    /// increment is backed out before returning so counters never leak.
    pub async fn reserve(
        &self,
        executor_id: Uuid,
        organization_id: Uuid,
        exec_cap: u32,
        org_cap: u32,
        ttl: Duration,
    ) -> Result<ReserveOutcome, SchedulerError> {
        let exec_key = executor_key(executor_id);
        let reserved_exec =
            self.bus.incr_capped(&exec_key, exec_cap as i64, ttl).await?.is_some();
        if !reserved_exec {
            return Ok(ReserveOutcome::ExecutorOverCapacity);
        }

        let reserved_org =
            self.bus.incr_capped(&org_key(organization_id), org_cap as i64, ttl).await?.is_some();
        if !reserved_org {
            self.bus.decr(&exec_key).await?;
            return Ok(ReserveOutcome::OrgQuotaExceeded);
        }

        Ok(ReserveOutcome::Reserved)
    }

    pub async fn release(
        &self,
        executor_id: Uuid,
        organization_id: Uuid,
    ) -> Result<(), SchedulerError> {
        self.bus.decr(&executor_key(executor_id)).await?;
        self.bus.decr(&org_key(organization_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "reservation_tests.rs"]
mod tests;
