// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Failure modes for a bus backend. Kept narrow: callers that need to
/// surface a user-facing code translate this themselves, since "the bus is
/// unreachable" maps to different taxonomy codes in different callers.
#[derive(Debug)]
pub enum BusError {
    Connection(String),
    Serialization(String),
    Protocol(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "bus connection error: {msg}"),
            Self::Serialization(msg) => write!(f, "bus serialization error: {msg}"),
            Self::Protocol(msg) => write!(f, "bus protocol error: {msg}"),
        }
    }
}

impl std::error::Error for BusError {}
