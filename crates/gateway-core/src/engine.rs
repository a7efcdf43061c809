// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The fixed table of session engines the brain knows how to drive.

use serde::{Deserialize, Serialize};

/// A session engine identifier. Unknown engine strings parse to `None`
/// rather than a variant, so callers can surface `ExecutorUnsupportedEngine`
/// without a catch-all branch silently accepting new values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineId {
    #[serde(rename = "gateway.codex.v2")]
    CodexV2,
    #[serde(rename = "gateway.claude.v2")]
    ClaudeV2,
    #[serde(rename = "gateway.opencode.v2")]
    OpencodeV2,
}

impl EngineId {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "gateway.codex.v2" => Some(Self::CodexV2),
            "gateway.claude.v2" => Some(Self::ClaudeV2),
            "gateway.opencode.v2" => Some(Self::OpencodeV2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodexV2 => "gateway.codex.v2",
            Self::ClaudeV2 => "gateway.claude.v2",
            Self::OpencodeV2 => "gateway.opencode.v2",
        }
    }

    /// True if this engine needs an OAuth-verified executor when no inline
    /// engine secret is available for the session.
    pub fn requires_executor_oauth(&self) -> bool {
        match self {
            Self::CodexV2 | Self::ClaudeV2 => true,
            Self::OpencodeV2 => false,
        }
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
