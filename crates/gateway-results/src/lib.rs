// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TTL'd reply and dispatch-results cache over the bus's key/value
//! primitive. A `requestId` is the only key anything here ever looks up by:
//! the bus doesn't know or care what produced it.

pub mod error;

pub use error::ResultsError;

use std::sync::Arc;
use std::time::Duration;

use gateway_bus::Bus;
use gateway_core::types::ReplyEnvelope;
use serde_json::Value;

fn reply_key(request_id: &str) -> String {
    format!("reply:{request_id}")
}

fn dispatch_key(request_id: &str) -> String {
    format!("dispatch:{request_id}")
}

/// Reply and dispatch-response storage, shared by edge and brain processes.
pub struct ResultsCache {
    bus: Arc<dyn Bus>,
}

impl ResultsCache {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    /// Store a reply envelope. First write for a given `requestId` wins:
    /// uses `SET ... NX` so a later, racing write never clobbers the one
    /// already recorded. A `false` return means another writer got there
    /// first, which is a no-op success, not an error.
    pub async fn put_reply(
        &self,
        request_id: &str,
        envelope: &ReplyEnvelope,
        ttl: Duration,
    ) -> Result<(), ResultsError> {
        let body =
            serde_json::to_string(envelope).map_err(|e| ResultsError::Serialization(e.to_string()))?;
        self.bus.kv_set_nx(&reply_key(request_id), &body, ttl).await?;
        Ok(())
    }

    pub async fn get_reply(&self, request_id: &str) -> Result<Option<ReplyEnvelope>, ResultsError> {
        let Some(raw) = self.bus.kv_get(&reply_key(request_id)).await? else { return Ok(None) };
        let envelope = serde_json::from_str(&raw).map_err(|e| ResultsError::Serialization(e.to_string()))?;
        Ok(Some(envelope))
    }

    /// Poll for a reply with exponential backoff starting at 25ms, capped at
    /// 250ms, until `timeout` elapses.
    pub async fn await_reply(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<ReplyEnvelope, ResultsError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut backoff = Duration::from_millis(25);
        loop {
            if let Some(envelope) = self.get_reply(request_id).await? {
                return Ok(envelope);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ResultsError::Timeout);
            }
            let sleep_for = backoff.min(deadline.saturating_duration_since(tokio::time::Instant::now()));
            tokio::time::sleep(sleep_for).await;
            backoff = (backoff * 2).min(Duration::from_millis(250));
        }
    }

    /// Cache a completed dispatch's response body for `GET
    /// /internal/v1/results/:requestId` and for idempotent re-dispatch.
    pub async fn put_dispatch_response(
        &self,
        request_id: &str,
        response: &Value,
        ttl: Duration,
    ) -> Result<(), ResultsError> {
        let body =
            serde_json::to_string(response).map_err(|e| ResultsError::Serialization(e.to_string()))?;
        self.bus.kv_set(&dispatch_key(request_id), &body, ttl).await?;
        Ok(())
    }

    pub async fn get_dispatch_response(&self, request_id: &str) -> Result<Option<Value>, ResultsError> {
        let Some(raw) = self.bus.kv_get(&dispatch_key(request_id)).await? else { return Ok(None) };
        let value = serde_json::from_str(&raw).map_err(|e| ResultsError::Serialization(e.to_string()))?;
        Ok(Some(value))
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
