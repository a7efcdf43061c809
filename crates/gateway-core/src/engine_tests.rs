// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::EngineId;

#[test]
fn parses_known_engines() {
    assert_eq!(EngineId::parse("gateway.codex.v2"), Some(EngineId::CodexV2));
    assert_eq!(EngineId::parse("gateway.claude.v2"), Some(EngineId::ClaudeV2));
    assert_eq!(EngineId::parse("gateway.opencode.v2"), Some(EngineId::OpencodeV2));
}

#[test]
fn rejects_unknown_engine() {
    assert_eq!(EngineId::parse("gateway.unknown.v1"), None);
    assert_eq!(EngineId::parse(""), None);
}

#[test]
fn oauth_requirement_matches_table() {
    assert!(EngineId::CodexV2.requires_executor_oauth());
    assert!(EngineId::ClaudeV2.requires_executor_oauth());
    assert!(!EngineId::OpencodeV2.requires_executor_oauth());
}

#[test]
fn as_str_round_trips_parse() {
    for e in [EngineId::CodexV2, EngineId::ClaudeV2, EngineId::OpencodeV2] {
        assert_eq!(EngineId::parse(e.as_str()), Some(e));
    }
}
