// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process harness wiring the bus, store, scheduler, results cache and
//! workspace coordinator the way a brain process does, without Redis,
//! Postgres or a network hop. `tests/scenarios.rs` drives the concrete
//! scenarios against this harness.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use gateway_brain::config::BrainConfig;
use gateway_brain::state::BrainState;
use gateway_bus::memory::InMemoryBus;
use gateway_bus::Bus;
use gateway_core::frame::ToEdgeFrame;
use gateway_core::types::{EngineAuthState, ExecutorKind, ExecutorRoute, Pool};
use gateway_results::ResultsCache;
use gateway_scheduler::Scheduler;
use gateway_store::memory::InMemoryStore;
use gateway_workspace::object_store::InMemoryObjectStore;
use gateway_workspace::WorkspaceCoordinator;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub fn test_config() -> BrainConfig {
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
        tool_output_max_chars: 200_000,
        rust_log: "info".into(),
    }
}

pub struct Harness {
    pub state: Arc<BrainState>,
    pub bus: Arc<dyn Bus>,
    pub store: Arc<InMemoryStore>,
}

pub async fn build_harness(config: BrainConfig) -> Harness {
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
        config,
        Arc::clone(&bus),
        Arc::clone(&store) as Arc<dyn gateway_store::Store>,
        scheduler,
        results,
        coordinator,
        None,
        CancellationToken::new(),
    );
    Harness { state, bus, store }
}

pub fn managed_route(id: Uuid, edge_id: &str, kind: ExecutorKind, max_in_flight: u32) -> ExecutorRoute {
    ExecutorRoute {
        executor_id: id,
        pool: Pool::Managed,
        organization_id: None,
        edge_id: edge_id.into(),
        labels: BTreeSet::new(),
        kinds: BTreeSet::from([kind]),
        max_in_flight,
        engine_auth: BTreeMap::new(),
        last_seen_ms: 0,
        last_used_ms: 0,
    }
}

pub fn byon_route(
    id: Uuid,
    organization_id: Uuid,
    edge_id: &str,
    kind: ExecutorKind,
    engine_auth: BTreeMap<String, EngineAuthState>,
) -> ExecutorRoute {
    ExecutorRoute {
        executor_id: id,
        pool: Pool::Byon,
        organization_id: Some(organization_id),
        edge_id: edge_id.into(),
        labels: BTreeSet::new(),
        kinds: BTreeSet::from([kind]),
        max_in_flight: 4,
        engine_auth,
        last_seen_ms: 0,
        last_used_ms: 0,
    }
}

/// Block until a frame lands on `gateway:bus:to_edge:<edgeId>`, decoding it.
/// Callers must `ensure_group` the stream first.
pub async fn next_to_edge_frame(bus: &Arc<dyn Bus>, edge_id: &str) -> ToEdgeFrame {
    loop {
        let stream = format!("gateway:bus:to_edge:{edge_id}");
        let batch = bus.read_group(&stream, "edge", "test-consumer", 1, 200).await.unwrap();
        if let Some(delivered) = batch.into_iter().next() {
            return serde_json::from_value(delivered.message).unwrap();
        }
    }
}
