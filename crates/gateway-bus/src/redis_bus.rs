// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis-backed `Bus`: streams + consumer groups for frames, `SET ... EX`
//! for reply/route keys, sets with a best-effort `EXPIRE` refresh for
//! session-edge presence.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis::{Script, Value as RedisValue};
use serde_json::Value;

use crate::{Bus, BusError, Delivery};

/// Atomically delete a key only if its value matches the expected token.
/// Guards against a lock holder releasing a key that a newer holder has
/// since acquired after the original holder's TTL expired.
const CAS_DELETE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Increment a counter unless it is already at `cap`, refreshing its TTL on
/// success. Creates the counter at 1 if absent.
const INCR_CAPPED_SCRIPT: &str = r#"
local current = tonumber(redis.call("GET", KEYS[1]) or "0")
local cap = tonumber(ARGV[1])
if current >= cap then
    return -1
end
local next_value = redis.call("INCR", KEYS[1])
redis.call("EXPIRE", KEYS[1], ARGV[2])
return next_value
"#;

/// Decrement a counter, clamped at zero, leaving its TTL untouched.
const DECR_CLAMPED_SCRIPT: &str = r#"
local current = tonumber(redis.call("GET", KEYS[1]) or "0")
if current <= 0 then
    redis.call("SET", KEYS[1], "0", "KEEPTTL")
    return 0
end
return redis.call("DECR", KEYS[1])
"#;

pub struct RedisBus {
    conn: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client =
            redis::Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }
}

fn to_conn_err(e: redis::RedisError) -> BusError {
    BusError::Connection(e.to_string())
}

#[async_trait]
impl Bus for RedisBus {
    async fn append(&self, stream: &str, message: &Value) -> Result<String, BusError> {
        let body = serde_json::to_string(message)
            .map_err(|e| BusError::Serialization(e.to_string()))?;
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(stream, "*", &[("payload", body.as_str())])
            .await
            .map_err(to_conn_err)?;
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(stream, group, "0").await;
        match result {
            Ok(()) => Ok(()),
            // BUSYGROUP: group already exists, which is the idempotent case we want.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(to_conn_err(e)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<Delivery>, BusError> {
        let mut conn = self.conn.clone();
        let opts = redis::streams::StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);
        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[stream], &[">"], &opts)
            .await
            .map_err(to_conn_err)?;

        let mut deliveries = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let Some(RedisValue::BulkString(raw)) = entry.map.get("payload") else {
                    continue;
                };
                let message: Value = serde_json::from_slice(raw)
                    .map_err(|e| BusError::Serialization(e.to_string()))?;
                deliveries.push(Delivery { id: entry.id, message });
            }
        }
        Ok(deliveries)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[id]).await.map_err(to_conn_err)?;
        Ok(())
    }

    async fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await.map_err(to_conn_err)?;
        Ok(())
    }

    async fn kv_set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError> {
        let mut conn = self.conn.clone();
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(ttl.as_secs().max(1)));
        let result: Option<String> = conn.set_options(key, value, opts).await.map_err(to_conn_err)?;
        Ok(result.is_some())
    }

    async fn kv_cas_delete(&self, key: &str, expected: &str) -> Result<bool, BusError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = Script::new(CAS_DELETE_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(to_conn_err)?;
        Ok(deleted == 1)
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>, BusError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(to_conn_err)
    }

    async fn kv_del(&self, key: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await.map_err(to_conn_err)?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(key, member).await.map_err(to_conn_err)?;
        let _: bool = conn.expire(key, ttl.as_secs().max(1) as i64).await.map_err(to_conn_err)?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(key, member).await.map_err(to_conn_err)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, BusError> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await.map_err(to_conn_err)
    }

    async fn incr_capped(
        &self,
        key: &str,
        cap: i64,
        ttl: Duration,
    ) -> Result<Option<i64>, BusError> {
        let mut conn = self.conn.clone();
        let result: i64 = Script::new(INCR_CAPPED_SCRIPT)
            .key(key)
            .arg(cap)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(to_conn_err)?;
        Ok(if result < 0 { None } else { Some(result) })
    }

    async fn decr(&self, key: &str) -> Result<i64, BusError> {
        let mut conn = self.conn.clone();
        Script::new(DECR_CLAMPED_SCRIPT).key(key).invoke_async(&mut conn).await.map_err(to_conn_err)
    }
}
