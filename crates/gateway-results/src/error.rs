// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use gateway_bus::BusError;

#[derive(Debug)]
pub enum ResultsError {
    Bus(BusError),
    Serialization(String),
    Timeout,
}

impl fmt::Display for ResultsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus error: {e}"),
            Self::Serialization(msg) => write!(f, "serialization error: {msg}"),
            Self::Timeout => write!(f, "timed out waiting for reply"),
        }
    }
}

impl std::error::Error for ResultsError {}

impl From<BusError> for ResultsError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}
