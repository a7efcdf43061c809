// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use gateway_bus::BusError;

/// Internal failure of a registry/reservation operation, distinct from the
/// user-facing selection outcomes in `GatewayError`.
#[derive(Debug)]
pub enum SchedulerError {
    Bus(BusError),
    Serialization(String),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "scheduler bus error: {e}"),
            Self::Serialization(msg) => write!(f, "scheduler serialization error: {msg}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<BusError> for SchedulerError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}
