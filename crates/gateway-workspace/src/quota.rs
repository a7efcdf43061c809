// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! 15s cache over the tenant store's `maxExecutorInFlight` setting. Clamped
//! to at least 1 and backed by a conservative default when the organization
//! hasn't configured a quota at all.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gateway_store::{Store, StoreError};
use tokio::sync::RwLock;
use uuid::Uuid;

const CACHE_TTL: Duration = Duration::from_secs(15);
const DEFAULT_MAX_IN_FLIGHT: u32 = 10;

pub struct QuotaCache {
    store: Arc<dyn Store>,
    cached: RwLock<HashMap<Uuid, (u32, Instant)>>,
    ttl: Duration,
    default_cap: u32,
}

impl QuotaCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_ttl(store, CACHE_TTL)
    }

    /// Same cache, with the TTL overridden by `GATEWAY_ORG_QUOTA_CACHE_TTL_MS`
    /// rather than the built-in default.
    pub fn with_ttl(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self::configured(store, ttl, DEFAULT_MAX_IN_FLIGHT)
    }

    /// Fully configured cache: TTL from `GATEWAY_ORG_QUOTA_CACHE_TTL_MS`,
    /// fallback cap from `GATEWAY_ORG_MAX_INFLIGHT` for organizations that
    /// haven't configured their own quota.
    pub fn configured(store: Arc<dyn Store>, ttl: Duration, default_cap: u32) -> Self {
        Self { store, cached: RwLock::new(HashMap::new()), ttl, default_cap: default_cap.max(1) }
    }

    pub async fn get(&self, organization_id: Uuid) -> Result<u32, StoreError> {
        if let Some((cap, fetched_at)) = self.cached.read().await.get(&organization_id).copied() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(cap);
            }
        }

        let quotas = self.store.get_org_quotas(organization_id).await?;
        let cap = quotas.max_executor_in_flight.unwrap_or(self.default_cap).max(1);
        self.cached.write().await.insert(organization_id, (cap, Instant::now()));
        Ok(cap)
    }
}

#[cfg(test)]
#[path = "quota_tests.rs"]
mod tests;
