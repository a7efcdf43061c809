// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message bus abstraction: append-only streams with consumer groups, plus
//! TTL'd key/value and set-of-members primitives for reply keys, route
//! registrations and session-edge presence.

pub mod error;
pub mod memory;
pub mod redis_bus;

pub use error::BusError;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// One delivered stream entry: an opaque id the caller must `ack` and the
/// decoded message body.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub message: Value,
}

/// The bus abstraction every edge and brain process talks to. Implementations
/// must provide at-least-once delivery for `read_group`/`ack`: a message is
/// only removed from the pending entries list of its consumer group once
/// `ack` succeeds.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Append a message to a stream. Fire-and-forget; returns the backend's
    /// assigned entry id.
    async fn append(&self, stream: &str, message: &Value) -> Result<String, BusError>;

    /// Idempotently ensure a consumer group exists on a stream.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError>;

    /// Read up to `count` undelivered messages for `group` on `stream`,
    /// blocking up to `block_ms` if none are immediately available.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<Delivery>, BusError>;

    /// Acknowledge successful processing of a delivered entry.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError>;

    /// Set a key to a string value with a TTL, unconditionally.
    async fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError>;

    /// Set a key only if it does not already exist ("NX"). Returns `true`
    /// if the key was set by this call, the basis for the session/workspace
    /// advisory locks.
    async fn kv_set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError>;

    /// Delete a key only if its current value matches `expected` ("compare
    /// and delete"), used to release a lock without clobbering a newer
    /// holder's lock after our own TTL has already expired.
    async fn kv_cas_delete(&self, key: &str, expected: &str) -> Result<bool, BusError>;

    async fn kv_get(&self, key: &str) -> Result<Option<String>, BusError>;

    async fn kv_del(&self, key: &str) -> Result<(), BusError>;

    /// Add a member to a TTL-refreshed set (e.g. `session:edges:<id>`).
    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), BusError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), BusError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, BusError>;

    /// Atomically increment a counter unless doing so would exceed `cap`.
    /// Returns the new value on success, or `None` if the counter was
    /// already at `cap`. Refreshes the counter's TTL on every successful
    /// increment so a crashed caller's reservation self-heals.
    async fn incr_capped(&self, key: &str, cap: i64, ttl: Duration) -> Result<Option<i64>, BusError>;

    /// Decrement a counter, clamped at zero.
    async fn decr(&self, key: &str) -> Result<i64, BusError>;
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
