// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisory workspace lock: a TTL'd key set with `kv_set_nx` and released by
//! `kv_cas_delete` against the exact token that acquired it, so a release
//! firing after the TTL has already handed the lock to someone else can
//! never clobber that newer holder.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use gateway_bus::Bus;
use rand::Rng;
use uuid::Uuid;

fn lock_key(workspace_id: Uuid) -> String {
    format!("workspace:lock:{workspace_id}")
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub struct WorkspaceLock {
    bus: Arc<dyn Bus>,
}

impl WorkspaceLock {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    /// Try to acquire the lock. Returns the token to present at `release` on
    /// success, `None` if the workspace is already locked.
    pub async fn acquire(
        &self,
        workspace_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<String>, gateway_bus::BusError> {
        let token = random_token();
        if self.bus.kv_set_nx(&lock_key(workspace_id), &token, ttl).await? {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    /// Release the lock iff it's still held under `token`.
    pub async fn release(
        &self,
        workspace_id: Uuid,
        token: &str,
    ) -> Result<bool, gateway_bus::BusError> {
        self.bus.kv_cas_delete(&lock_key(workspace_id), token).await
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
