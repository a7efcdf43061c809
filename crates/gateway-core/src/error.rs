// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Gateway-wide error taxonomy. Every code here is both an HTTP-mappable
/// status and a session-event error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayError {
    NoExecutorAvailable,
    ExecutorOverCapacity,
    OrgQuotaExceeded,
    ExecutorOAuthNotVerified,
    PinnedAgentOffline,
    NodeExecutionTimeout,
    NodeExecutionFailed,
    WorkspaceLocked,
    WorkspaceVersionConflict,
    WorkspaceS3NotConfigured,
    ExecutorUnsupportedEngine,
    InvalidAgentRunPayload,
    InvalidBlockKind,
    UnsupportedKind,
    GatewayTimeout,
    GatewayResponseInvalid,
    Unauthorized,
    BadRequest,
    NotFound,
    Internal,
}

impl GatewayError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::BadRequest
            | Self::InvalidAgentRunPayload
            | Self::InvalidBlockKind
            | Self::UnsupportedKind => 400,
            Self::NotFound => 404,
            Self::WorkspaceLocked => 409,
            Self::WorkspaceVersionConflict => 409,
            Self::NoExecutorAvailable
            | Self::ExecutorOverCapacity
            | Self::OrgQuotaExceeded
            | Self::ExecutorOAuthNotVerified
            | Self::PinnedAgentOffline
            | Self::ExecutorUnsupportedEngine
            | Self::WorkspaceS3NotConfigured => 422,
            Self::NodeExecutionTimeout | Self::GatewayTimeout => 504,
            Self::NodeExecutionFailed | Self::GatewayResponseInvalid | Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoExecutorAvailable => "NO_EXECUTOR_AVAILABLE",
            Self::ExecutorOverCapacity => "EXECUTOR_OVER_CAPACITY",
            Self::OrgQuotaExceeded => "ORG_QUOTA_EXCEEDED",
            Self::ExecutorOAuthNotVerified => "EXECUTOR_OAUTH_NOT_VERIFIED",
            Self::PinnedAgentOffline => "PINNED_AGENT_OFFLINE",
            Self::NodeExecutionTimeout => "NodeExecutionTimeout",
            Self::NodeExecutionFailed => "NodeExecutionFailed",
            Self::WorkspaceLocked => "WORKSPACE_LOCKED",
            Self::WorkspaceVersionConflict => "WORKSPACE_VERSION_CONFLICT",
            Self::WorkspaceS3NotConfigured => "WORKSPACE_S3_NOT_CONFIGURED",
            Self::ExecutorUnsupportedEngine => "ExecutorUnsupportedEngine",
            Self::InvalidAgentRunPayload => "INVALID_AGENT_RUN_PAYLOAD",
            Self::InvalidBlockKind => "INVALID_BLOCK_KIND",
            Self::UnsupportedKind => "UNSUPPORTED_KIND",
            Self::GatewayTimeout => "GATEWAY_TIMEOUT",
            Self::GatewayResponseInvalid => "GATEWAY_RESPONSE_INVALID",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for GatewayError {}

/// Top-level error response envelope for the internal HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(feature = "axum-error")]
mod axum_impl {
    use super::{ErrorResponse, GatewayError};
    use axum::http::StatusCode;
    use axum::Json;

    impl GatewayError {
        pub fn to_http_response(
            &self,
            message: impl Into<String>,
        ) -> (StatusCode, Json<ErrorResponse>) {
            let status = StatusCode::from_u16(self.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = ErrorResponse { error: self.to_error_body(message) };
            (status, Json(body))
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
