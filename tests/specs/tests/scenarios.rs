// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against the in-process harness: one dispatch or
//! session turn at a time, driven through the real `gateway-brain` handlers
//! against an in-memory bus and store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_brain::dispatch::handle as handle_dispatch;
use gateway_brain::session::{handle_cancel, handle_send, SessionSend};
use gateway_bus::Bus;
use gateway_core::error::GatewayError;
use gateway_core::frame::{dispatch_request_id, Dispatch, DispatchKind, ExecutorSessionPayload, ToEdgeFrame};
use gateway_core::types::{
    EngineAuthState, ExecutorKind, ExecutorSelector, OrgQuotas, Pool, ReplyEnvelope, ReplyStatus, Session,
    WorkspaceOwner,
};
use gateway_scheduler::SelectionRequest;
use gateway_specs::{build_harness, byon_route, managed_route, next_to_edge_frame, test_config};
use gateway_store::Store;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn sample_session(organization_id: Uuid, engine_id: &str) -> Session {
    Session {
        session_id: Uuid::new_v4(),
        organization_id,
        engine_id: engine_id.into(),
        llm_provider: None,
        llm_model: Some("gpt-5".into()),
        llm_secret_id: None,
        prompt_system: None,
        prompt_instructions: None,
        tools_allow: vec![],
        limits: BTreeMap::new(),
        memory_provider: None,
        executor_selector: None,
        pinned_executor_id: None,
        pinned_executor_pool: None,
        routed_agent_id: None,
        session_key: "sess-key".into(),
        timeout_ms: 2_000,
        runtime: json!({}),
    }
}

fn sample_dispatch(kind: DispatchKind, organization_id: Uuid, run_id: Uuid, payload: serde_json::Value) -> Dispatch {
    Dispatch {
        kind,
        organization_id,
        run_id,
        workflow_id: Uuid::new_v4(),
        node_id: "node-1".into(),
        attempt_count: 1,
        payload,
        secret_refs: Vec::new(),
    }
}

async fn reply_as_executor(bus: &Arc<dyn Bus>, edge_id: &str, status: ReplyStatus, output: serde_json::Value) {
    bus.ensure_group(&format!("gateway:bus:to_edge:{edge_id}"), "edge").await.unwrap();
    let frame = next_to_edge_frame(bus, edge_id).await;
    let ToEdgeFrame::ExecutorInvoke { invoke, .. } = frame else { panic!("expected tool invoke frame") };
    gateway_results::ResultsCache::new(Arc::clone(bus))
        .put_reply(
            &invoke.request_id,
            &ReplyEnvelope { status, output: Some(output), error: None, content: None, workspace: None },
            Duration::from_secs(10),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn happy_dispatch_succeeds_and_serves_cached_response_on_replay() {
    let harness = build_harness(test_config()).await;
    let organization_id = Uuid::new_v4();
    let executor_id = Uuid::new_v4();
    harness
        .state
        .scheduler
        .registry()
        .register(&managed_route(executor_id, "edge-1", ExecutorKind::ConnectorAction, 4))
        .await
        .unwrap();

    let run_id = Uuid::new_v4();
    let dispatch = sample_dispatch(DispatchKind::ConnectorAction, organization_id, run_id, json!({"connectorId": "c"}));
    let request_id = dispatch_request_id(run_id, &dispatch.node_id, dispatch.attempt_count);

    let task = {
        let state = Arc::clone(&harness.state);
        let dispatch = dispatch.clone();
        let request_id = request_id.clone();
        tokio::spawn(async move { handle_dispatch(&state, request_id, dispatch, false).await })
    };
    reply_as_executor(&harness.bus, "edge-1", ReplyStatus::Succeeded, json!({"ok": true})).await;
    task.await.unwrap();

    let reply = harness.state.results.get_reply(&request_id).await.unwrap().unwrap();
    assert_eq!(reply.status, ReplyStatus::Succeeded);

    // replaying the cached dispatch response (a retried delivery of the same
    // frame) must resolve to the exact same body without re-invoking anything.
    let first = harness.state.results.get_dispatch_response(&request_id).await.unwrap().unwrap();
    let second = harness.state.results.get_dispatch_response(&request_id).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(first["requestId"], json!(request_id));
}

#[tokio::test]
async fn org_quota_exceeded_while_a_second_organization_keeps_its_own_headroom() {
    let harness = build_harness(test_config()).await;
    let executor_id = Uuid::new_v4();
    harness
        .state
        .scheduler
        .registry()
        .register(&managed_route(executor_id, "edge-1", ExecutorKind::AgentRun, 2))
        .await
        .unwrap();

    let org_a = Uuid::new_v4();
    let org_b = Uuid::new_v4();
    let selector = ExecutorSelector::default();

    let first = harness
        .state
        .scheduler
        .select(SelectionRequest {
            pool_order: &[Pool::Managed],
            organization_id: org_a,
            selector: &selector,
            kind: ExecutorKind::AgentRun,
            required_engine: None,
            org_cap: 1,
            reservation_ttl: Duration::from_secs(30),
        })
        .await
        .unwrap();
    assert_eq!(first.executor_id, executor_id);

    // org A is now at its cap of 1; a second reservation for the same org
    // must fail even though the executor itself still has headroom (2).
    let second = harness
        .state
        .scheduler
        .select(SelectionRequest {
            pool_order: &[Pool::Managed],
            organization_id: org_a,
            selector: &selector,
            kind: ExecutorKind::AgentRun,
            required_engine: None,
            org_cap: 1,
            reservation_ttl: Duration::from_secs(30),
        })
        .await;
    assert_eq!(second.unwrap_err(), GatewayError::OrgQuotaExceeded);

    // org B has never reserved anything and gets its own counter.
    let third = harness
        .state
        .scheduler
        .select(SelectionRequest {
            pool_order: &[Pool::Managed],
            organization_id: org_b,
            selector: &selector,
            kind: ExecutorKind::AgentRun,
            required_engine: None,
            org_cap: 1,
            reservation_ttl: Duration::from_secs(30),
        })
        .await
        .unwrap();
    assert_eq!(third.executor_id, executor_id);
}

#[tokio::test]
async fn session_fails_over_to_a_fresh_executor_when_the_pin_goes_offline() {
    let harness = build_harness(test_config()).await;
    let organization_id = Uuid::new_v4();
    let mut sess = sample_session(organization_id, "gateway.opencode.v2");
    let offline_pin = Uuid::new_v4();
    sess.pinned_executor_id = Some(offline_pin);
    sess.pinned_executor_pool = Some(Pool::Byon);
    harness.store.insert_session(sess.clone()).await;

    let fresh_id = Uuid::new_v4();
    harness
        .state
        .scheduler
        .registry()
        .register(&byon_route(fresh_id, organization_id, "edge-2", ExecutorKind::AgentRun, BTreeMap::new()))
        .await
        .unwrap();
    harness.bus.ensure_group("gateway:bus:to_edge:edge-2", "edge").await.unwrap();
    harness.bus.set_add(&format!("session:edges:{}", sess.session_id), "edge-2", Duration::from_secs(60)).await.unwrap();

    let send = SessionSend {
        request_id: "req-1".into(),
        organization_id,
        user_id: Uuid::new_v4(),
        session_id: sess.session_id,
        user_event_seq: 1,
        message: Some("hi".into()),
        attachments: vec![],
        idempotency_key: None,
        origin_edge_id: None,
        source: None,
    };
    let task = {
        let state = Arc::clone(&harness.state);
        tokio::spawn(async move { handle_send(&state, CancellationToken::new(), send).await })
    };

    let open_frame = next_to_edge_frame(&harness.bus, "edge-2").await;
    let ToEdgeFrame::ExecutorSession { executor_id, payload: ExecutorSessionPayload::SessionOpen { request_id, .. } } =
        open_frame
    else {
        panic!("expected session open frame");
    };
    assert_eq!(executor_id, fresh_id);
    gateway_results::ResultsCache::new(Arc::clone(&harness.bus))
        .put_reply(
            &request_id,
            &ReplyEnvelope { status: ReplyStatus::Succeeded, output: None, error: None, content: None, workspace: None },
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    let turn_frame = next_to_edge_frame(&harness.bus, "edge-2").await;
    let ToEdgeFrame::ExecutorSession { payload: ExecutorSessionPayload::SessionTurn { request_id, .. }, .. } =
        turn_frame
    else {
        panic!("expected session turn frame");
    };
    gateway_results::ResultsCache::new(Arc::clone(&harness.bus))
        .put_reply(
            &request_id,
            &ReplyEnvelope {
                status: ReplyStatus::Succeeded,
                output: None,
                error: None,
                content: Some(json!("hello")),
                workspace: None,
            },
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    task.await.unwrap();

    let events = harness.store.recent_session_events(sess.session_id, 20).await.unwrap();
    let failover = events.iter().find(|e| e.payload["action"] == "session_executor_failover").unwrap();
    assert_eq!(failover.payload["from"], json!(offline_pin));
    assert_eq!(failover.payload["to"], json!(fresh_id));
    assert!(events.iter().any(|e| e.event_type == "agent_final"));

    let reloaded = harness.store.get_session(sess.session_id).await.unwrap().unwrap();
    assert_eq!(reloaded.pinned_executor_id, Some(fresh_id));
}

#[tokio::test]
async fn workspace_commit_rejects_a_stale_version() {
    let harness = build_harness(test_config()).await;
    let organization_id = Uuid::new_v4();
    let owner = WorkspaceOwner::WorkflowRun { run_id: Uuid::new_v4() };
    let workspace = harness.store.create_workspace(organization_id, owner).await.unwrap();

    let committed = harness
        .store
        .commit_workspace_version(workspace.workspace_id, 0, "workspaces/w/v1".into(), Some("etag-1".into()))
        .await
        .unwrap();
    assert_eq!(committed.current_version, 1);

    // a second writer racing off the same pre-commit version must be rejected.
    let stale = harness
        .store
        .commit_workspace_version(workspace.workspace_id, 0, "workspaces/w/v1-conflict".into(), None)
        .await;
    assert!(matches!(stale, Err(gateway_store::StoreError::VersionConflict)));

    // the correct next writer, using the now-current version, succeeds.
    let advanced = harness
        .store
        .commit_workspace_version(workspace.workspace_id, 1, "workspaces/w/v2".into(), None)
        .await
        .unwrap();
    assert_eq!(advanced.current_version, 2);
}

#[tokio::test]
async fn cancel_mid_turn_stops_before_agent_final_and_skips_no_executor_error() {
    let harness = build_harness(test_config()).await;
    let organization_id = Uuid::new_v4();
    let sess = sample_session(organization_id, "gateway.opencode.v2");
    harness.store.insert_session(sess.clone()).await;

    let executor_id = Uuid::new_v4();
    harness
        .state
        .scheduler
        .registry()
        .register(&managed_route(executor_id, "edge-3", ExecutorKind::AgentRun, 4))
        .await
        .unwrap();
    harness.bus.ensure_group("gateway:bus:to_edge:edge-3", "edge").await.unwrap();
    harness.bus.set_add(&format!("session:edges:{}", sess.session_id), "edge-3", Duration::from_secs(60)).await.unwrap();

    let send = SessionSend {
        request_id: "req-2".into(),
        organization_id,
        user_id: Uuid::new_v4(),
        session_id: sess.session_id,
        user_event_seq: 1,
        message: Some("long running task".into()),
        attachments: vec![],
        idempotency_key: None,
        origin_edge_id: None,
        source: None,
    };
    let task = {
        let state = Arc::clone(&harness.state);
        tokio::spawn(async move { handle_send(&state, CancellationToken::new(), send).await })
    };

    let open_frame = next_to_edge_frame(&harness.bus, "edge-3").await;
    let ToEdgeFrame::ExecutorSession { payload: ExecutorSessionPayload::SessionOpen { request_id, .. }, .. } =
        open_frame
    else {
        panic!("expected session open frame");
    };
    gateway_results::ResultsCache::new(Arc::clone(&harness.bus))
        .put_reply(
            &request_id,
            &ReplyEnvelope { status: ReplyStatus::Succeeded, output: None, error: None, content: None, workspace: None },
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    let turn_frame = next_to_edge_frame(&harness.bus, "edge-3").await;
    let ToEdgeFrame::ExecutorSession { payload: ExecutorSessionPayload::SessionTurn { request_id: turn_request, .. }, .. } =
        turn_frame
    else {
        panic!("expected session turn frame");
    };

    handle_cancel(&harness.state, sess.session_id, organization_id).await;
    let cancel_frame = next_to_edge_frame(&harness.bus, "edge-3").await;
    assert!(matches!(
        cancel_frame,
        ToEdgeFrame::ExecutorSession { payload: ExecutorSessionPayload::SessionCancel { .. }, .. }
    ));

    gateway_results::ResultsCache::new(Arc::clone(&harness.bus))
        .put_reply(
            &turn_request,
            &ReplyEnvelope {
                status: ReplyStatus::Failed,
                output: None,
                error: Some("TURN_CANCELED".into()),
                content: None,
                workspace: None,
            },
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    task.await.unwrap();

    let events = harness.store.recent_session_events(sess.session_id, 20).await.unwrap();
    assert!(events.iter().any(|e| e.payload["action"] == "session_cancel_requested"));
    assert!(events.iter().any(|e| e.payload["action"] == "session_turn_canceled"));
    assert!(!events.iter().any(|e| e.event_type == "agent_final"));
    assert!(harness.state.active_turn(sess.session_id).await.is_none());
}

#[tokio::test]
async fn oauth_gated_session_succeeds_once_the_executor_reports_a_verified_grant() {
    let harness = build_harness(test_config()).await;
    let organization_id = Uuid::new_v4();
    let sess = sample_session(organization_id, "gateway.codex.v2");
    harness.store.insert_session(sess.clone()).await;

    let executor_id = Uuid::new_v4();
    let unverified = BTreeMap::from([(
        "gateway.codex.v2".to_owned(),
        EngineAuthState { oauth_verified: false, checked_at: chrono::Utc::now(), reason: None },
    )]);
    harness
        .state
        .scheduler
        .registry()
        .register(&managed_route_with_auth(executor_id, "edge-4", unverified))
        .await
        .unwrap();
    harness.bus.ensure_group("gateway:bus:to_edge:edge-4", "edge").await.unwrap();
    harness.bus.set_add(&format!("session:edges:{}", sess.session_id), "edge-4", Duration::from_secs(60)).await.unwrap();

    let send = move || SessionSend {
        request_id: "req-3".into(),
        organization_id,
        user_id: Uuid::new_v4(),
        session_id: sess.session_id,
        user_event_seq: 1,
        message: Some("hi".into()),
        attachments: vec![],
        idempotency_key: None,
        origin_edge_id: None,
        source: None,
    };

    handle_send(&harness.state, CancellationToken::new(), send()).await;
    let events = harness.store.recent_session_events(sess.session_id, 20).await.unwrap();
    let error_event = events.iter().find(|e| e.event_type == "error").expect("expected an oauth error event");
    assert_eq!(error_event.payload["code"], json!("EXECUTOR_OAUTH_NOT_VERIFIED"));

    // a fresh executor_hello_v2 reports the grant is now verified.
    let verified = BTreeMap::from([(
        "gateway.codex.v2".to_owned(),
        EngineAuthState { oauth_verified: true, checked_at: chrono::Utc::now(), reason: None },
    )]);
    harness
        .state
        .scheduler
        .registry()
        .register(&managed_route_with_auth(executor_id, "edge-4", verified))
        .await
        .unwrap();

    let task = {
        let state = Arc::clone(&harness.state);
        tokio::spawn(async move { handle_send(&state, CancellationToken::new(), send()).await })
    };

    let open_frame = next_to_edge_frame(&harness.bus, "edge-4").await;
    let ToEdgeFrame::ExecutorSession { executor_id: opened_id, payload: ExecutorSessionPayload::SessionOpen { request_id, .. } } =
        open_frame
    else {
        panic!("expected session open frame");
    };
    assert_eq!(opened_id, executor_id);
    gateway_results::ResultsCache::new(Arc::clone(&harness.bus))
        .put_reply(
            &request_id,
            &ReplyEnvelope { status: ReplyStatus::Succeeded, output: None, error: None, content: None, workspace: None },
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    let turn_frame = next_to_edge_frame(&harness.bus, "edge-4").await;
    let ToEdgeFrame::ExecutorSession { payload: ExecutorSessionPayload::SessionTurn { request_id, .. }, .. } =
        turn_frame
    else {
        panic!("expected session turn frame");
    };
    gateway_results::ResultsCache::new(Arc::clone(&harness.bus))
        .put_reply(
            &request_id,
            &ReplyEnvelope {
                status: ReplyStatus::Succeeded,
                output: None,
                error: None,
                content: Some(json!("hello")),
                workspace: None,
            },
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    task.await.unwrap();

    let reloaded = harness.store.get_session(sess.session_id).await.unwrap().unwrap();
    assert_eq!(reloaded.pinned_executor_id, Some(executor_id));
}

fn managed_route_with_auth(
    id: Uuid,
    edge_id: &str,
    engine_auth: BTreeMap<String, EngineAuthState>,
) -> gateway_core::types::ExecutorRoute {
    let mut route = managed_route(id, edge_id, ExecutorKind::AgentRun, 4);
    route.engine_auth = engine_auth;
    route
}

#[tokio::test]
async fn org_quota_cache_falls_back_to_the_configured_default_and_clamps_to_one() {
    let harness = build_harness(test_config()).await;

    // no quota configured for this org: falls back to BrainConfig's
    // `org_max_inflight` (50 in the test config).
    let unconfigured_org = Uuid::new_v4();
    let cap = harness.state.quotas.get(unconfigured_org).await.unwrap();
    assert_eq!(cap, 50);

    // an explicit quota of 0 is nonsensical and clamped up to 1 rather than
    // locking the organization out entirely.
    let zeroed_org = Uuid::new_v4();
    harness.store.set_org_quotas(zeroed_org, OrgQuotas { max_executor_in_flight: Some(0) }).await;
    let clamped = harness.state.quotas.get(zeroed_org).await.unwrap();
    assert_eq!(clamped, 1);
}
