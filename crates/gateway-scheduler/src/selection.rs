// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor selection: filter candidates by pool/tenant/kind/labels/group/
//! OAuth, score by load, then attempt reservation in score order.

use std::sync::Arc;
use std::time::Duration;

use gateway_bus::Bus;
use gateway_core::error::GatewayError;
use gateway_core::types::{ExecutorKind, ExecutorRoute, ExecutorSelector, Pool};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::registry::RouteRegistry;
use crate::reservation::{ReserveOutcome, Reservations};

/// A selection request, scoped to one invocation.
pub struct SelectionRequest<'a> {
    pub pool_order: &'a [Pool],
    pub organization_id: Uuid,
    pub selector: &'a ExecutorSelector,
    pub kind: ExecutorKind,
    pub required_engine: Option<&'a str>,
    pub org_cap: u32,
    pub reservation_ttl: Duration,
}

/// Scheduler facade combining the route registry and capacity reservations.
pub struct Scheduler {
    registry: RouteRegistry,
    reservations: Reservations,
}

impl Scheduler {
    pub fn new(bus: Arc<dyn Bus>, route_ttl: Duration) -> Self {
        Self {
            registry: RouteRegistry::new(Arc::clone(&bus), route_ttl),
            reservations: Reservations::new(bus),
        }
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub fn reservations(&self) -> &Reservations {
        &self.reservations
    }

    /// Reserve a specific, already-known executor (the session pin re-use
    /// path). Does not run candidate filtering beyond an OAuth check.
    pub async fn reserve_pinned(
        &self,
        executor_id: Uuid,
        organization_id: Uuid,
        org_cap: u32,
        required_engine: Option<&str>,
        ttl: Duration,
    ) -> Result<ExecutorRoute, GatewayError> {
        let route = self
            .registry
            .get(executor_id)
            .await
            .map_err(|_| GatewayError::Internal)?
            .ok_or(GatewayError::PinnedAgentOffline)?;

        if let Some(engine) = required_engine {
            if !route.is_oauth_verified(engine) {
                return Err(GatewayError::ExecutorOAuthNotVerified);
            }
        }

        match self
            .reservations
            .reserve(executor_id, organization_id, route.max_in_flight, org_cap, ttl)
            .await
            .map_err(|_| GatewayError::Internal)?
        {
            ReserveOutcome::Reserved => {
                let _ = self.registry.mark_used(&route).await;
                Ok(route)
            }
            ReserveOutcome::ExecutorOverCapacity => Err(GatewayError::ExecutorOverCapacity),
            ReserveOutcome::OrgQuotaExceeded => Err(GatewayError::OrgQuotaExceeded),
        }
    }

    /// Run full candidate selection: filter, score, then attempt
    /// reservation over candidates in score order until one succeeds.
    pub async fn select(&self, req: SelectionRequest<'_>) -> Result<ExecutorRoute, GatewayError> {
        let mut candidates = Vec::new();
        let mut any_oauth_filtered = false;

        for &pool in req.pool_order {
            let org_filter = match pool {
                Pool::Byon => Some(req.organization_id),
                Pool::Managed => None,
            };
            let routes = self.registry.list(pool, org_filter).await.map_err(|_| GatewayError::Internal)?;
            for route in routes {
                if !route.kinds.contains(&req.kind) {
                    continue;
                }
                if !req.selector.labels.is_subset(&route.labels) {
                    continue;
                }
                if let Some(group) = &req.selector.group {
                    if !route.labels.contains(&format!("group:{group}")) {
                        continue;
                    }
                }
                if let Some(wanted) = req.selector.executor_id {
                    if route.executor_id != wanted {
                        continue;
                    }
                }
                if let Some(engine) = req.required_engine {
                    if !route.is_oauth_verified(engine) {
                        any_oauth_filtered = true;
                        continue;
                    }
                }
                candidates.push(route);
            }
        }

        if let Some(wanted) = req.selector.executor_id {
            if !candidates.iter().any(|r| r.executor_id == wanted) {
                return Err(GatewayError::NoExecutorAvailable);
            }
        }

        if candidates.is_empty() {
            return Err(if any_oauth_filtered {
                GatewayError::ExecutorOAuthNotVerified
            } else {
                GatewayError::NoExecutorAvailable
            });
        }

        let mut scored = Vec::with_capacity(candidates.len());
        for route in candidates {
            let in_flight =
                self.reservations.in_flight(route.executor_id).await.map_err(|_| GatewayError::Internal)?;
            let load = in_flight as f64 / route.max_in_flight.max(1) as f64;
            scored.push((load, route.last_used_ms, route));
        }
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(a.1.cmp(&b.1))
        });

        let mut worst: Option<GatewayError> = None;
        for (_, _, route) in scored {
            match self
                .reservations
                .reserve(route.executor_id, req.organization_id, route.max_in_flight, req.org_cap, req.reservation_ttl)
                .await
                .map_err(|_| GatewayError::Internal)?
            {
                ReserveOutcome::Reserved => {
                    let _ = self.registry.mark_used(&route).await;
                    return Ok(route);
                }
                ReserveOutcome::ExecutorOverCapacity => {
                    if worst != Some(GatewayError::OrgQuotaExceeded) {
                        worst = Some(GatewayError::ExecutorOverCapacity);
                    }
                }
                ReserveOutcome::OrgQuotaExceeded => {
                    worst = Some(GatewayError::OrgQuotaExceeded);
                }
            }
        }

        Err(worst.unwrap_or(GatewayError::NoExecutorAvailable))
    }

    pub async fn release(&self, executor_id: Uuid, organization_id: Uuid) -> Result<(), SchedulerError> {
        self.reservations.release(executor_id, organization_id).await
    }
}

#[cfg(test)]
#[path = "selection_tests.rs"]
mod tests;
