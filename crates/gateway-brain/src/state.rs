// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use gateway_bus::Bus;
use gateway_results::ResultsCache;
use gateway_scheduler::Scheduler;
use gateway_store::Store;
use gateway_workspace::{QuotaCache, WorkspaceCoordinator};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::BrainConfig;
use crate::secrets::Kek;

/// Bookkeeping for a session turn this brain is actively driving, so a
/// `session_cancel` arriving on a different frame can find and mark it.
#[derive(Debug, Clone)]
pub struct ActiveTurn {
    pub request_id: String,
    pub executor_id: Uuid,
    pub edge_id: String,
    pub canceled: bool,
}

pub struct BrainState {
    pub config: BrainConfig,
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn Store>,
    pub scheduler: Arc<Scheduler>,
    pub results: Arc<ResultsCache>,
    pub coordinator: WorkspaceCoordinator,
    pub quotas: QuotaCache,
    pub kek: Option<Kek>,
    pub shutdown: CancellationToken,
    active_turns: RwLock<HashMap<Uuid, ActiveTurn>>,
}

impl BrainState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BrainConfig,
        bus: Arc<dyn Bus>,
        store: Arc<dyn Store>,
        scheduler: Arc<Scheduler>,
        results: Arc<ResultsCache>,
        coordinator: WorkspaceCoordinator,
        kek: Option<Kek>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let quotas =
            QuotaCache::configured(Arc::clone(&store), config.org_quota_cache_ttl(), config.org_max_inflight);
        Arc::new(Self {
            config,
            bus,
            store,
            scheduler,
            results,
            coordinator,
            quotas,
            kek,
            shutdown,
            active_turns: RwLock::new(HashMap::new()),
        })
    }

    fn brain_lock_key(session_id: Uuid) -> String {
        format!("session:brain:{session_id}")
    }

    /// Acquire exclusive ownership of a session's turn for ~30s, matching
    /// the TTL a single turn is expected to complete well within.
    pub async fn acquire_turn_lock(&self, session_id: Uuid) -> Result<bool, gateway_bus::BusError> {
        self.bus
            .kv_set_nx(&Self::brain_lock_key(session_id), "1", std::time::Duration::from_secs(30))
            .await
    }

    pub async fn release_turn_lock(&self, session_id: Uuid) {
        let _ = self.bus.kv_del(&Self::brain_lock_key(session_id)).await;
    }

    pub async fn track_turn(&self, session_id: Uuid, turn: ActiveTurn) {
        self.active_turns.write().await.insert(session_id, turn);
    }

    pub async fn untrack_turn(&self, session_id: Uuid) {
        self.active_turns.write().await.remove(&session_id);
    }

    pub async fn active_turn(&self, session_id: Uuid) -> Option<ActiveTurn> {
        self.active_turns.read().await.get(&session_id).cloned()
    }

    /// Mark the session's active turn canceled, if one is tracked here.
    /// Returns `true` if a turn was found and marked.
    pub async fn mark_turn_canceled(&self, session_id: Uuid) -> bool {
        let mut turns = self.active_turns.write().await;
        if let Some(turn) = turns.get_mut(&session_id) {
            turn.canceled = true;
            true
        } else {
            false
        }
    }

    pub fn to_edge_stream(&self, edge_id: &str) -> String {
        format!("gateway:bus:to_edge:{edge_id}")
    }
}
