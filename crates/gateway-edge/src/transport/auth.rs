// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer/cookie auth for the internal HTTP API and the two WebSocket hubs.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use gateway_bus::Bus;
use gateway_core::error::{ErrorResponse, GatewayError};
use gateway_core::types::Pool;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::state::EdgeState;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

fn sha256_hex(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    format!("{digest:x}")
}

/// Validate the `x-gateway-token` header carried by every internal HTTP caller.
pub fn validate_service_token(headers: &HeaderMap, expected: &str) -> Result<(), GatewayError> {
    let token =
        headers.get("x-gateway-token").and_then(|v| v.to_str().ok()).ok_or(GatewayError::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

/// Axum middleware enforcing the service token on the internal HTTP API.
/// Exempt: `/healthz` and both WebSocket upgrades, which authenticate via
/// their own query-param tokens.
pub async fn service_auth_layer(
    State(state): State<Arc<EdgeState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/healthz" || path.starts_with("/ws/") || path.starts_with("/ingress/") {
        return next.run(req).await;
    }

    if let Err(code) = validate_service_token(req.headers(), &state.config.service_token) {
        let body = ErrorResponse { error: code.to_error_body("unauthorized") };
        return (
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::UNAUTHORIZED),
            axum::Json(body),
        )
            .into_response();
    }

    next.run(req).await
}

/// An authenticated chat client: the user and org presenting the token.
#[derive(Debug, Clone, Copy)]
pub struct ClientIdentity {
    pub user_id: Uuid,
    pub organization_id: Uuid,
}

/// Validate a client access token of the form `<userId>.<organizationId>.<mac>`,
/// where `mac` is the hex-encoded SHA-256 of `secret || userId || organizationId`.
/// Accepts the refresh-token secret as a fallback so a refresh cookie value
/// validates the same way an access token bearer header does.
pub fn verify_client_token(
    access_secret: &str,
    refresh_secret: &str,
    token: &str,
) -> Option<ClientIdentity> {
    let mut parts = token.splitn(3, '.');
    let user_id = parts.next()?.parse::<Uuid>().ok()?;
    let organization_id = parts.next()?.parse::<Uuid>().ok()?;
    let mac = parts.next()?;

    for secret in [access_secret, refresh_secret] {
        let expected = sha256_hex(&format!("{secret}{user_id}{organization_id}"));
        if constant_time_eq(mac, &expected) {
            return Some(ClientIdentity { user_id, organization_id });
        }
    }
    None
}

/// An authenticated executor connection. For `managed` pool connections
/// `uuid` is the executor's own stable identity; for `byon` it is the owning
/// organization's id, and the executor's own identity is established by its
/// first `executor_hello_v2` frame.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorIdentity {
    pub uuid: Uuid,
    pub pool: Pool,
}

impl ExecutorIdentity {
    pub fn organization_id(&self) -> Option<Uuid> {
        match self.pool {
            Pool::Managed => None,
            Pool::Byon => Some(self.uuid),
        }
    }
}

/// Validate an executor token of the form `<uuid>.<secret>`.
///
/// The token's SHA-256 hash is checked against `executor:tokenhash:<uuid>`
/// in the bus. The first token ever presented for a given `uuid` is trusted
/// and its hash persisted (trust-on-first-use); a revoked credential is one
/// whose `executor:revoked:<uuid>` marker key is present, which the upgrade
/// path always checks first.
pub async fn verify_executor_token(
    bus: &dyn Bus,
    pool: Pool,
    token: &str,
) -> Result<ExecutorIdentity, GatewayError> {
    let (uuid_part, secret) = token.split_once('.').ok_or(GatewayError::Unauthorized)?;
    let uuid = uuid_part.parse::<Uuid>().map_err(|_| GatewayError::Unauthorized)?;

    if bus.kv_get(&format!("executor:revoked:{uuid}")).await.map_err(|_| GatewayError::Internal)?.is_some()
    {
        return Err(GatewayError::Unauthorized);
    }

    let hash_key = format!("executor:tokenhash:{uuid}");
    let presented = sha256_hex(secret);
    match bus.kv_get(&hash_key).await.map_err(|_| GatewayError::Internal)? {
        Some(stored) if constant_time_eq(&stored, &presented) => {}
        Some(_) => return Err(GatewayError::Unauthorized),
        None => {
            bus.kv_set(&hash_key, &presented, std::time::Duration::from_secs(365 * 24 * 3600))
                .await
                .map_err(|_| GatewayError::Internal)?;
        }
    }

    Ok(ExecutorIdentity { uuid, pool })
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
