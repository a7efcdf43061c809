// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! An in-process `Bus` implementation backing the test suite. Consumer
//! groups here are cursor-based rather than pending-entry-list based: once a
//! message is handed to `read_group` it will not be redelivered even without
//! an `ack`. That is weaker than the Redis backend's at-least-once contract,
//! which is acceptable for deterministic single-process tests but must never
//! be used in production.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{Bus, BusError, Delivery};

struct GroupState {
    cursor: usize,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<(String, Value)>,
    groups: HashMap<String, GroupState>,
}

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self { value, expires_at: Instant::now() + ttl }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-memory bus for tests. `Default`-constructible, cheap to clone behind
/// an `Arc`.
#[derive(Default)]
pub struct InMemoryBus {
    streams: RwLock<HashMap<String, StreamState>>,
    kv: RwLock<HashMap<String, Expiring<String>>>,
    sets: RwLock<HashMap<String, HashMap<String, Expiring<()>>>>,
    counters: RwLock<HashMap<String, Expiring<i64>>>,
    next_id: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn append(&self, stream: &str, message: &Value) -> Result<String, BusError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let mut streams = self.streams.write().await;
        let entry = streams.entry(stream.to_owned()).or_default();
        entry.entries.push((id.clone(), message.clone()));
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let mut streams = self.streams.write().await;
        let entry = streams.entry(stream.to_owned()).or_default();
        entry.groups.entry(group.to_owned()).or_insert(GroupState { cursor: 0 });
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        _block_ms: u64,
    ) -> Result<Vec<Delivery>, BusError> {
        let mut streams = self.streams.write().await;
        let Some(entry) = streams.get_mut(stream) else {
            return Ok(vec![]);
        };
        let Some(group_state) = entry.groups.get_mut(group) else {
            return Err(BusError::Protocol(format!("unknown consumer group: {group}")));
        };
        let start = group_state.cursor.min(entry.entries.len());
        let end = (start + count).min(entry.entries.len());
        group_state.cursor = end;
        Ok(entry.entries[start..end]
            .iter()
            .map(|(id, message)| Delivery { id: id.clone(), message: message.clone() })
            .collect())
    }

    async fn ack(&self, _stream: &str, _group: &str, _id: &str) -> Result<(), BusError> {
        Ok(())
    }

    async fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        self.kv.write().await.insert(key.to_owned(), Expiring::new(value.to_owned(), ttl));
        Ok(())
    }

    async fn kv_set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError> {
        let mut kv = self.kv.write().await;
        if kv.get(key).is_some_and(Expiring::is_live) {
            return Ok(false);
        }
        kv.insert(key.to_owned(), Expiring::new(value.to_owned(), ttl));
        Ok(true)
    }

    async fn kv_cas_delete(&self, key: &str, expected: &str) -> Result<bool, BusError> {
        let mut kv = self.kv.write().await;
        match kv.get(key) {
            Some(existing) if existing.is_live() && existing.value == expected => {
                kv.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, BusError> {
        let kv = self.kv.read().await;
        Ok(kv.get(key).filter(|v| v.is_live()).map(|v| v.value.clone()))
    }

    async fn kv_del(&self, key: &str) -> Result<(), BusError> {
        self.kv.write().await.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), BusError> {
        let mut sets = self.sets.write().await;
        sets.entry(key.to_owned())
            .or_default()
            .insert(member.to_owned(), Expiring::new((), ttl));
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), BusError> {
        if let Some(members) = self.sets.write().await.get_mut(key) {
            members.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, BusError> {
        let sets = self.sets.read().await;
        Ok(sets
            .get(key)
            .map(|members| {
                members.iter().filter(|(_, v)| v.is_live()).map(|(k, _)| k.clone()).collect()
            })
            .unwrap_or_default())
    }

    async fn incr_capped(
        &self,
        key: &str,
        cap: i64,
        ttl: Duration,
    ) -> Result<Option<i64>, BusError> {
        let mut counters = self.counters.write().await;
        let current = counters.get(key).filter(|v| v.is_live()).map(|v| v.value).unwrap_or(0);
        if current >= cap {
            return Ok(None);
        }
        let next = current + 1;
        counters.insert(key.to_owned(), Expiring::new(next, ttl));
        Ok(Some(next))
    }

    async fn decr(&self, key: &str) -> Result<i64, BusError> {
        let mut counters = self.counters.write().await;
        let Some(existing) = counters.get_mut(key).filter(|v| v.is_live()) else {
            return Ok(0);
        };
        existing.value = (existing.value - 1).max(0);
        Ok(existing.value)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
