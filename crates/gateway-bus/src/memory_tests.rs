// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde_json::json;

use super::InMemoryBus;
use crate::Bus;

#[tokio::test]
async fn append_then_read_group_delivers_in_order() {
    let bus = InMemoryBus::new();
    bus.ensure_group("s", "g").await.unwrap();
    bus.append("s", &json!({"n": 1})).await.unwrap();
    bus.append("s", &json!({"n": 2})).await.unwrap();

    let batch = bus.read_group("s", "g", "c1", 10, 0).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].message, json!({"n": 1}));
    assert_eq!(batch[1].message, json!({"n": 2}));

    let empty = bus.read_group("s", "g", "c1", 10, 0).await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn independent_groups_each_see_all_messages() {
    let bus = InMemoryBus::new();
    bus.ensure_group("s", "g1").await.unwrap();
    bus.append("s", &json!({"n": 1})).await.unwrap();
    bus.ensure_group("s", "g2").await.unwrap();

    assert_eq!(bus.read_group("s", "g1", "c", 10, 0).await.unwrap().len(), 1);
    assert_eq!(bus.read_group("s", "g2", "c", 10, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn kv_set_nx_only_succeeds_once_until_expiry() {
    let bus = InMemoryBus::new();
    assert!(bus.kv_set_nx("lock", "holder-a", Duration::from_millis(30)).await.unwrap());
    assert!(!bus.kv_set_nx("lock", "holder-b", Duration::from_secs(5)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(bus.kv_set_nx("lock", "holder-b", Duration::from_secs(5)).await.unwrap());
}

#[tokio::test]
async fn kv_cas_delete_only_removes_matching_value() {
    let bus = InMemoryBus::new();
    bus.kv_set("lock", "token-a", Duration::from_secs(5)).await.unwrap();
    assert!(!bus.kv_cas_delete("lock", "token-b").await.unwrap());
    assert!(bus.kv_get("lock").await.unwrap().is_some());
    assert!(bus.kv_cas_delete("lock", "token-a").await.unwrap());
    assert!(bus.kv_get("lock").await.unwrap().is_none());
}

#[tokio::test]
async fn set_members_reflects_add_and_remove() {
    let bus = InMemoryBus::new();
    bus.set_add("session:edges:1", "edge-a", Duration::from_secs(5)).await.unwrap();
    bus.set_add("session:edges:1", "edge-b", Duration::from_secs(5)).await.unwrap();
    let mut members = bus.set_members("session:edges:1").await.unwrap();
    members.sort();
    assert_eq!(members, vec!["edge-a", "edge-b"]);

    bus.set_remove("session:edges:1", "edge-a").await.unwrap();
    assert_eq!(bus.set_members("session:edges:1").await.unwrap(), vec!["edge-b"]);
}

#[tokio::test]
async fn incr_capped_refuses_past_cap_and_decr_clamps_at_zero() {
    let bus = InMemoryBus::new();
    assert_eq!(bus.incr_capped("n", 2, Duration::from_secs(5)).await.unwrap(), Some(1));
    assert_eq!(bus.incr_capped("n", 2, Duration::from_secs(5)).await.unwrap(), Some(2));
    assert_eq!(bus.incr_capped("n", 2, Duration::from_secs(5)).await.unwrap(), None);

    assert_eq!(bus.decr("n").await.unwrap(), 1);
    assert_eq!(bus.decr("n").await.unwrap(), 0);
    assert_eq!(bus.decr("n").await.unwrap(), 0);
}

#[tokio::test]
async fn decr_on_missing_counter_is_a_no_op() {
    let bus = InMemoryBus::new();
    assert_eq!(bus.decr("never-incremented").await.unwrap(), 0);
}

#[tokio::test]
async fn read_group_rejects_unknown_group() {
    let bus = InMemoryBus::new();
    bus.append("s", &json!({})).await.unwrap();
    assert!(bus.read_group("s", "missing", "c", 10, 0).await.is_err());
}
