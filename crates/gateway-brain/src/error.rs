// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use gateway_core::error::GatewayError;

/// Internal brain failure, distinct from the user-facing `GatewayError`
/// taxonomy a turn or dispatch ultimately resolves to.
#[derive(Debug)]
pub enum BrainError {
    Config(String),
    SecretDecryption(String),
    Gateway(GatewayError),
}

impl fmt::Display for BrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "brain config error: {msg}"),
            Self::SecretDecryption(msg) => write!(f, "secret decryption error: {msg}"),
            Self::Gateway(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BrainError {}

impl From<GatewayError> for BrainError {
    fn from(e: GatewayError) -> Self {
        Self::Gateway(e)
    }
}

impl From<BrainError> for GatewayError {
    fn from(e: BrainError) -> Self {
        match e {
            BrainError::Gateway(inner) => inner,
            BrainError::Config(_) | BrainError::SecretDecryption(_) => GatewayError::Internal,
        }
    }
}
