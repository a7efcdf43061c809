// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use gateway_bus::memory::InMemoryBus;
use gateway_bus::Bus;
use gateway_core::error::GatewayError;
use gateway_core::frame::ToEdgeFrame;
use gateway_core::types::{
    ExecutorKind, ExecutorRoute, ExecutorSelector, Pool, ReplyEnvelope, ReplyStatus, WorkspaceOwner,
};
use gateway_results::ResultsCache;
use gateway_scheduler::Scheduler;
use gateway_store::memory::InMemoryStore;
use serde_json::json;
use uuid::Uuid;

use crate::InMemoryObjectStore;
use super::{InvokeRequest, WorkspaceCoordinator};

fn sample_route(id: Uuid) -> ExecutorRoute {
    ExecutorRoute {
        executor_id: id,
        pool: Pool::Managed,
        organization_id: None,
        edge_id: "edge-1".into(),
        labels: BTreeSet::new(),
        kinds: BTreeSet::from([ExecutorKind::AgentRun]),
        max_in_flight: 4,
        engine_auth: BTreeMap::new(),
        last_seen_ms: 0,
        last_used_ms: 0,
    }
}

fn sample_request(organization_id: Uuid) -> InvokeRequest {
    InvokeRequest {
        organization_id,
        owner: WorkspaceOwner::WorkflowRun { run_id: Uuid::new_v4() },
        pool_order: vec![Pool::Managed],
        selector: ExecutorSelector::default(),
        kind: ExecutorKind::AgentRun,
        required_engine: None,
        timeout_ms: 5_000,
        network_mode: "none".into(),
        output_max_chars: 4096,
        payload: json!({"tool": "noop"}),
    }
}

#[tokio::test]
async fn happy_path_invokes_executor_and_commits_workspace_version() {
    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&bus), Duration::from_secs(30)));
    let results = Arc::new(ResultsCache::new(Arc::clone(&bus)));
    let object_store = Arc::new(InMemoryObjectStore);

    let executor_id = Uuid::new_v4();
    scheduler.registry().register(&sample_route(executor_id)).await.unwrap();

    let coordinator = WorkspaceCoordinator::new(
        Arc::clone(&bus),
        store,
        Arc::clone(&scheduler),
        Arc::clone(&results),
        object_store,
    );

    let org = Uuid::new_v4();
    let task = tokio::spawn({
        let request = sample_request(org);
        async move { coordinator.invoke_tool_on_executor(request).await }
    });

    // act as the edge: pick up the invoke frame and reply.
    bus.ensure_group("gateway:bus:to_edge:edge-1", "edge").await.unwrap();
    let delivered = loop {
        let batch =
            bus.read_group("gateway:bus:to_edge:edge-1", "edge", "c1", 1, 200).await.unwrap();
        if let Some(d) = batch.into_iter().next() {
            break d;
        }
    };
    let frame: ToEdgeFrame = serde_json::from_value(delivered.message).unwrap();
    let ToEdgeFrame::ExecutorInvoke { invoke, .. } = frame else { panic!("wrong frame") };

    results
        .put_reply(
            &invoke.request_id,
            &ReplyEnvelope {
                status: ReplyStatus::Succeeded,
                output: Some(json!({"ok": true})),
                error: None,
                content: None,
                workspace: Some(gateway_core::types::WorkspaceCommit {
                    workspace_id: invoke.workspace.workspace_id,
                    version: invoke.workspace.version + 1,
                    object_key: invoke.workspace_access.unwrap().upload.object_key,
                    etag: None,
                }),
            },
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    let reply = task.await.unwrap().unwrap();
    assert_eq!(reply.status, ReplyStatus::Succeeded);
    assert_eq!(scheduler.reservations().in_flight(executor_id).await.unwrap(), 0);
}

#[tokio::test]
async fn no_executor_available_never_touches_the_workspace() {
    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&bus), Duration::from_secs(30)));
    let results = Arc::new(ResultsCache::new(Arc::clone(&bus)));
    let object_store = Arc::new(InMemoryObjectStore);

    let coordinator = WorkspaceCoordinator::new(bus, store, scheduler, results, object_store);
    let err = coordinator.invoke_tool_on_executor(sample_request(Uuid::new_v4())).await.unwrap_err();
    assert_eq!(err, GatewayError::NoExecutorAvailable);
}

#[tokio::test]
async fn timeout_waiting_for_reply_releases_capacity_and_lock() {
    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&bus), Duration::from_secs(30)));
    let results = Arc::new(ResultsCache::new(Arc::clone(&bus)));
    let object_store = Arc::new(InMemoryObjectStore);

    let executor_id = Uuid::new_v4();
    scheduler.registry().register(&sample_route(executor_id)).await.unwrap();

    let coordinator = WorkspaceCoordinator::new(
        Arc::clone(&bus),
        store,
        Arc::clone(&scheduler),
        results,
        object_store,
    );

    let mut request = sample_request(Uuid::new_v4());
    request.timeout_ms = 50;
    let err = coordinator.invoke_tool_on_executor(request).await.unwrap_err();
    assert_eq!(err, GatewayError::NodeExecutionTimeout);
    assert_eq!(scheduler.reservations().in_flight(executor_id).await.unwrap(), 0);
}
