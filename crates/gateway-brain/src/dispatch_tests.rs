// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use gateway_bus::memory::InMemoryBus;
use gateway_bus::Bus;
use gateway_core::frame::{Dispatch, DispatchKind, ToEdgeFrame};
use gateway_core::types::{EngineAuthState, ExecutorKind, ExecutorRoute, Pool, ReplyEnvelope, ReplyStatus};
use gateway_results::ResultsCache;
use gateway_scheduler::Scheduler;
use gateway_store::memory::InMemoryStore;
use gateway_store::EncryptedSecret;
use gateway_workspace::object_store::InMemoryObjectStore;
use gateway_workspace::WorkspaceCoordinator;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::handle;
use crate::config::BrainConfig;
use crate::secrets::Kek;
use crate::state::BrainState;

fn config() -> BrainConfig {
    BrainConfig {
        redis_url: "redis://localhost".into(),
        database_url: None,
        org_max_inflight: 50,
        reserve_ttl_ms: 30_000,
        org_quota_cache_ttl_ms: 15_000,
        results_ttl_sec: 900,
        workspace_presign_expires_sec: 600,
        kek: None,
        workflow_continuation_queue_name: "workflow-continuations".into(),
        session_open_timeout_ms: 20_000,
        dispatch_timeout_ms: 5_000,
        tool_output_max_chars: 4096,
        rust_log: "info".into(),
    }
}

async fn build_state(kek: Option<Kek>) -> (Arc<BrainState>, Arc<dyn Bus>, Arc<InMemoryStore>) {
    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&bus), Duration::from_secs(30)));
    let results = Arc::new(ResultsCache::new(Arc::clone(&bus)));
    let coordinator = WorkspaceCoordinator::new(
        Arc::clone(&bus),
        Arc::clone(&store) as Arc<dyn gateway_store::Store>,
        Arc::clone(&scheduler),
        Arc::clone(&results),
        Arc::new(InMemoryObjectStore),
    );
    let state = BrainState::new(
        config(),
        Arc::clone(&bus),
        Arc::clone(&store) as Arc<dyn gateway_store::Store>,
        scheduler,
        results,
        coordinator,
        kek,
        CancellationToken::new(),
    );
    (state, bus, store)
}

fn sample_route(id: Uuid, kind: ExecutorKind, engine_auth: BTreeMap<String, EngineAuthState>) -> ExecutorRoute {
    ExecutorRoute {
        executor_id: id,
        pool: Pool::Managed,
        organization_id: None,
        edge_id: "edge-1".into(),
        labels: BTreeSet::new(),
        kinds: BTreeSet::from([kind]),
        max_in_flight: 4,
        engine_auth,
        last_seen_ms: 0,
        last_used_ms: 0,
    }
}

fn sample_dispatch(kind: DispatchKind, organization_id: Uuid, payload: serde_json::Value) -> Dispatch {
    Dispatch {
        kind,
        organization_id,
        run_id: Uuid::new_v4(),
        workflow_id: Uuid::new_v4(),
        node_id: "node-1".into(),
        attempt_count: 1,
        payload,
        secret_refs: Vec::new(),
    }
}

async fn reply_as_executor(bus: &Arc<dyn Bus>, status: ReplyStatus, output: serde_json::Value) {
    let delivered = loop {
        let batch = bus.read_group("gateway:bus:to_edge:edge-1", "edge", "c1", 1, 200).await.unwrap();
        if let Some(d) = batch.into_iter().next() {
            break d;
        }
    };
    let frame: ToEdgeFrame = serde_json::from_value(delivered.message).unwrap();
    let ToEdgeFrame::ExecutorInvoke { invoke, .. } = frame else { panic!("wrong frame") };
    ResultsCache::new(Arc::clone(bus))
        .put_reply(
            &invoke.request_id,
            &ReplyEnvelope { status, output: Some(output), error: None, content: None, workspace: None },
            Duration::from_secs(10),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn connector_action_dispatch_invokes_executor_and_caches_response() {
    let (state, bus, _store) = build_state(None).await;
    let organization_id = Uuid::new_v4();
    let executor_id = Uuid::new_v4();
    state
        .scheduler
        .registry()
        .register(&sample_route(executor_id, ExecutorKind::ConnectorAction, BTreeMap::new()))
        .await
        .unwrap();

    bus.ensure_group("gateway:bus:to_edge:edge-1", "edge").await.unwrap();

    let dispatch =
        sample_dispatch(DispatchKind::ConnectorAction, organization_id, json!({"connectorId": "c", "actionId": "a"}));
    let request_id = "run-1:node-1:1".to_owned();

    let task = {
        let state = Arc::clone(&state);
        let request_id = request_id.clone();
        tokio::spawn(async move { handle(&state, request_id, dispatch, false).await })
    };
    reply_as_executor(&bus, ReplyStatus::Succeeded, json!({"ok": true})).await;
    task.await.unwrap();

    let reply = state.results.get_reply(&request_id).await.unwrap().unwrap();
    assert_eq!(reply.status, ReplyStatus::Succeeded);
    let cached = state.results.get_dispatch_response(&request_id).await.unwrap().unwrap();
    assert_eq!(cached["requestId"], json!(request_id));
}

#[tokio::test]
async fn agent_run_missing_node_fails_with_invalid_payload() {
    let (state, _bus, _store) = build_state(None).await;
    let organization_id = Uuid::new_v4();
    let dispatch = sample_dispatch(
        DispatchKind::AgentRun,
        organization_id,
        json!({"env": {"githubApiBaseUrl": "https://api.github.com"}, "engineId": "gateway.codex.v2"}),
    );
    let request_id = "run-2:node-1:1".to_owned();

    handle(&state, request_id.clone(), dispatch, false).await;

    let reply = state.results.get_reply(&request_id).await.unwrap().unwrap();
    assert_eq!(reply.status, ReplyStatus::Failed);
    assert_eq!(reply.error.as_deref(), Some("INVALID_AGENT_RUN_PAYLOAD"));
}

#[tokio::test]
async fn agent_run_with_inline_engine_secret_skips_oauth_requirement() {
    let key_bytes = [9u8; 32];
    let kek = Kek::load(&STANDARD.encode(key_bytes)).unwrap();
    let (state, bus, store) = build_state(Some(kek)).await;

    let organization_id = Uuid::new_v4();
    let secret_id = Uuid::new_v4();
    let ciphertext = seal(&key_bytes, [4u8; NONCE_LEN], b"gh-token");
    store
        .insert_secret(EncryptedSecret {
            secret_id,
            organization_id,
            kind: "engine_secret".into(),
            ciphertext,
            kek_version: 1,
        })
        .await;

    // unverified OAuth: would fail selection if required_engine were set.
    let engine_auth = BTreeMap::from([(
        "gateway.codex.v2".to_owned(),
        EngineAuthState { oauth_verified: false, checked_at: chrono::Utc::now(), reason: None },
    )]);
    let executor_id = Uuid::new_v4();
    state
        .scheduler
        .registry()
        .register(&sample_route(executor_id, ExecutorKind::AgentRun, engine_auth))
        .await
        .unwrap();
    bus.ensure_group("gateway:bus:to_edge:edge-1", "edge").await.unwrap();

    let dispatch = sample_dispatch(
        DispatchKind::AgentRun,
        organization_id,
        json!({
            "node": {"id": "n"},
            "env": {"githubApiBaseUrl": "https://api.github.com"},
            "engineId": "gateway.codex.v2",
            "engineSecretId": secret_id.to_string(),
        }),
    );
    let request_id = "run-3:node-1:1".to_owned();

    let task = {
        let state = Arc::clone(&state);
        let request_id = request_id.clone();
        tokio::spawn(async move { handle(&state, request_id, dispatch, false).await })
    };
    reply_as_executor(&bus, ReplyStatus::Succeeded, json!({"ok": true})).await;
    task.await.unwrap();

    let reply = state.results.get_reply(&request_id).await.unwrap().unwrap();
    assert_eq!(reply.status, ReplyStatus::Succeeded);
}

#[tokio::test]
async fn async_dispatch_enqueues_continuation_job_exactly_once() {
    let (state, bus, _store) = build_state(None).await;
    let organization_id = Uuid::new_v4();
    let executor_id = Uuid::new_v4();
    state
        .scheduler
        .registry()
        .register(&sample_route(executor_id, ExecutorKind::ConnectorAction, BTreeMap::new()))
        .await
        .unwrap();
    bus.ensure_group("gateway:bus:to_edge:edge-1", "edge").await.unwrap();
    bus.ensure_group("workflow-continuations", "test").await.unwrap();

    let dispatch =
        sample_dispatch(DispatchKind::ConnectorAction, organization_id, json!({"connectorId": "c", "actionId": "a"}));
    let request_id = "run-4:node-1:1".to_owned();

    let task = {
        let state = Arc::clone(&state);
        let dispatch = dispatch.clone();
        let request_id = request_id.clone();
        tokio::spawn(async move { handle(&state, request_id, dispatch, true).await })
    };
    reply_as_executor(&bus, ReplyStatus::Succeeded, json!({"ok": true})).await;
    task.await.unwrap();

    // replay the same request id (retried dispatch) — must not double-enqueue.
    handle(&state, request_id.clone(), dispatch, true).await;

    let batch = bus.read_group("workflow-continuations", "test", "c1", 10, 50).await.unwrap();
    assert_eq!(batch.len(), 1);
}

fn seal(key_bytes: &[u8; 32], nonce_bytes: [u8; NONCE_LEN], plaintext: &[u8]) -> Vec<u8> {
    let unbound = UnboundKey::new(&AES_256_GCM, key_bytes).unwrap();
    let key = LessSafeKey::new(unbound);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let mut buf = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut buf).unwrap();
    let mut out = nonce_bytes.to_vec();
    out.extend(buf);
    out
}
