// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for a brain worker process.
#[derive(Debug, Clone, clap::Parser)]
pub struct BrainConfig {
    /// Bus backend connection string.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: String,

    /// Persistent store connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Default per-organization in-flight cap when the org hasn't configured
    /// its own quota.
    #[arg(long, default_value_t = 50, env = "GATEWAY_ORG_MAX_INFLIGHT")]
    pub org_max_inflight: u32,

    /// TTL in milliseconds for an executor/org capacity reservation.
    #[arg(long, default_value_t = 300_000, env = "GATEWAY_RESERVE_TTL_MS")]
    pub reserve_ttl_ms: u64,

    /// TTL in milliseconds for the cached per-organization quota lookup.
    #[arg(long, default_value_t = 15_000, env = "GATEWAY_ORG_QUOTA_CACHE_TTL_MS")]
    pub org_quota_cache_ttl_ms: u64,

    /// TTL in seconds for cached dispatch responses and reply envelopes.
    #[arg(long, default_value_t = 900, env = "GATEWAY_RESULTS_TTL_SEC")]
    pub results_ttl_sec: u64,

    /// Expiry in seconds for workspace pre-signed URLs.
    #[arg(long, default_value_t = 600, env = "WORKSPACE_PRESIGN_EXPIRES_SEC")]
    pub workspace_presign_expires_sec: u64,

    /// Base64-encoded key-encryption key used to decrypt tenant secrets
    /// before forwarding them to an executor. Required wherever an
    /// `agent.run` dispatch is handled.
    #[arg(long, env = "GATEWAY_KEK")]
    pub kek: Option<String>,

    /// Name of the external work queue continuation jobs are enqueued to.
    #[arg(long, default_value = "workflow-continuations", env = "WORKFLOW_CONTINUATION_QUEUE_NAME")]
    pub workflow_continuation_queue_name: String,

    /// Default session-turn timeout when a session hasn't overridden it.
    #[arg(long, default_value_t = 20_000, env = "GATEWAY_SESSION_OPEN_TIMEOUT_MS")]
    pub session_open_timeout_ms: u64,

    /// Default dispatch timeout for `agent.execute`/`agent.run`/`connector.action`
    /// workflow dispatches, which carry no timeout of their own on the wire.
    #[arg(long, default_value_t = 60_000, env = "GATEWAY_DISPATCH_TIMEOUT_MS")]
    pub dispatch_timeout_ms: u64,

    /// Hard cap on an executor's per-turn output, in characters.
    #[arg(long, default_value_t = 200_000, env = "GATEWAY_TOOL_OUTPUT_MAX_CHARS")]
    pub tool_output_max_chars: u32,

    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub rust_log: String,
}

impl BrainConfig {
    pub fn reserve_ttl(&self) -> Duration {
        Duration::from_millis(self.reserve_ttl_ms)
    }

    pub fn org_quota_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.org_quota_cache_ttl_ms)
    }

    pub fn results_ttl(&self) -> Duration {
        Duration::from_secs(self.results_ttl_sec)
    }

    pub fn session_open_timeout(&self) -> Duration {
        Duration::from_millis(self.session_open_timeout_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}
