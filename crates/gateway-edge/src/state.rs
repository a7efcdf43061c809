// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message;
use gateway_bus::Bus;
use gateway_results::ResultsCache;
use gateway_scheduler::Scheduler;
use gateway_store::Store;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EdgeConfig;

/// Shared edge state: the bus/store/scheduler handles, local WebSocket
/// routing tables, and the per-session event fanout.
pub struct EdgeState {
    pub config: EdgeConfig,
    pub edge_id: String,
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn Store>,
    pub results: Arc<ResultsCache>,
    pub scheduler: Arc<Scheduler>,
    pub shutdown: CancellationToken,
    /// Local broadcast channel per session that currently has at least one
    /// joined client on this edge.
    session_broadcasts: RwLock<HashMap<Uuid, broadcast::Sender<Value>>>,
    /// Local outbound sender per connected executor socket.
    executor_sockets: RwLock<HashMap<Uuid, mpsc::UnboundedSender<Message>>>,
}

impl EdgeState {
    pub fn new(
        config: EdgeConfig,
        bus: Arc<dyn Bus>,
        store: Arc<dyn Store>,
        results: Arc<ResultsCache>,
        scheduler: Arc<Scheduler>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let edge_id = config.resolved_edge_id();
        Arc::new(Self {
            config,
            edge_id,
            bus,
            store,
            results,
            scheduler,
            shutdown,
            session_broadcasts: RwLock::new(HashMap::new()),
            executor_sockets: RwLock::new(HashMap::new()),
        })
    }

    pub fn to_edge_stream(&self) -> String {
        format!("gateway:bus:to_edge:{}", self.edge_id)
    }

    pub async fn session_subscribe(&self, session_id: Uuid) -> broadcast::Receiver<Value> {
        let mut map = self.session_broadcasts.write().await;
        map.entry(session_id).or_insert_with(|| broadcast::channel(256).0).subscribe()
    }

    pub async fn session_broadcast(&self, session_id: Uuid, event: Value) {
        if let Some(tx) = self.session_broadcasts.read().await.get(&session_id) {
            let _ = tx.send(event);
        }
    }

    /// Drop the local broadcast channel for a session once its last
    /// subscriber leaves. Returns whether it was actually removed, so the
    /// caller knows whether to also clear this edge's bus presence entry.
    pub async fn session_drop_if_unused(&self, session_id: Uuid) -> bool {
        let mut map = self.session_broadcasts.write().await;
        if map.get(&session_id).map(|tx| tx.receiver_count() == 0).unwrap_or(false) {
            map.remove(&session_id);
            true
        } else {
            false
        }
    }

    pub async fn register_executor_socket(&self, executor_id: Uuid, tx: mpsc::UnboundedSender<Message>) {
        self.executor_sockets.write().await.insert(executor_id, tx);
    }

    pub async fn deregister_executor_socket(&self, executor_id: Uuid) {
        self.executor_sockets.write().await.remove(&executor_id);
    }

    pub async fn send_to_executor(&self, executor_id: Uuid, message: Message) -> bool {
        let sockets = self.executor_sockets.read().await;
        match sockets.get(&executor_id) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Local connection counts reported by `/healthz`: (joined sessions,
    /// connected executors). Approximate by nature since another edge
    /// process holds its own counts.
    pub async fn connection_counts(&self) -> (usize, usize) {
        (self.session_broadcasts.read().await.len(), self.executor_sockets.read().await.len())
    }
}
