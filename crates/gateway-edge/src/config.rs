// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the edge listener.
#[derive(Debug, Clone, clap::Parser)]
pub struct EdgeConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "GATEWAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "GATEWAY_PORT")]
    pub port: u16,

    /// Stable identity for this edge process. Defaults to `host:port` if unset.
    #[arg(long, env = "EDGE_ID")]
    pub edge_id: Option<String>,

    /// Bus backend connection string.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: String,

    /// Persistent store connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Bearer token for internal service-to-service callers.
    #[arg(long, env = "GATEWAY_SERVICE_TOKEN")]
    pub service_token: String,

    /// Signing secret for short-lived client access tokens.
    #[arg(long, env = "AUTH_TOKEN_SECRET")]
    pub auth_token_secret: String,

    /// Signing secret for long-lived client refresh tokens.
    #[arg(long, env = "REFRESH_TOKEN_SECRET")]
    pub refresh_token_secret: String,

    /// Cookie name carrying the refresh token.
    #[arg(long, default_value = "gateway_refresh", env = "SESSION_COOKIE_NAME")]
    pub session_cookie_name: String,

    /// TTL in seconds for cached dispatch responses and reply envelopes.
    #[arg(long, default_value_t = 900, env = "GATEWAY_RESULTS_TTL_SEC")]
    pub results_ttl_sec: u64,

    /// TTL in milliseconds after which a registered executor is considered stale.
    #[arg(long, default_value_t = 60_000, env = "GATEWAY_AGENT_STALE_MS")]
    pub agent_stale_ms: u64,

    /// Server-side ceiling on the `maxInFlight` an executor may self-report.
    #[arg(long, default_value_t = 64, env = "GATEWAY_EXECUTOR_MAX_IN_FLIGHT")]
    pub executor_max_in_flight_cap: u32,

    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub rust_log: String,
}

impl EdgeConfig {
    pub fn resolved_edge_id(&self) -> String {
        self.edge_id.clone().unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }

    pub fn results_ttl(&self) -> Duration {
        Duration::from_secs(self.results_ttl_sec)
    }

    pub fn agent_stale(&self) -> Duration {
        Duration::from_millis(self.agent_stale_ms)
    }
}
