// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway brain: consumes workflow dispatches and session turns off the bus
//! and drives them to completion against whatever executor the scheduler
//! picks. Has no HTTP listener of its own; everything it does is a reaction
//! to a frame on `gateway:bus:to_brain`.

pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod secrets;
pub mod session;
pub mod state;

use std::sync::Arc;

use gateway_bus::redis_bus::RedisBus;
use gateway_bus::Bus;
use gateway_results::ResultsCache;
use gateway_scheduler::Scheduler;
use gateway_store::memory::InMemoryStore;
use gateway_store::postgres::PostgresStore;
use gateway_store::Store;
use gateway_workspace::object_store::NotConfiguredObjectStore;
use gateway_workspace::WorkspaceCoordinator;
use tokio_util::sync::CancellationToken;

use crate::config::BrainConfig;
use crate::secrets::Kek;
use crate::state::BrainState;

/// Run the brain worker until shutdown.
pub async fn run(config: BrainConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let bus: Arc<dyn Bus> = Arc::new(RedisBus::connect(&config.redis_url).await?);
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(PostgresStore::connect(url).await?),
        None => {
            tracing::warn!("DATABASE_URL unset; running with an in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };
    let results = Arc::new(ResultsCache::new(Arc::clone(&bus)));
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&bus), config.reserve_ttl()));

    let kek = match &config.kek {
        Some(raw) => Some(Kek::load(raw)?),
        None => {
            tracing::warn!("GATEWAY_KEK unset; agent.run dispatches requiring tenant secrets will fail");
            None
        }
    };

    let coordinator = WorkspaceCoordinator::new(
        Arc::clone(&bus),
        Arc::clone(&store),
        Arc::clone(&scheduler),
        Arc::clone(&results),
        Arc::new(NotConfiguredObjectStore),
    )
    .with_quota_config(config.org_quota_cache_ttl(), config.org_max_inflight);

    let state = BrainState::new(config, bus, store, scheduler, results, coordinator, kek, shutdown.clone());

    tracing::info!("gateway-brain starting");
    consumer::spawn(Arc::clone(&state));

    shutdown_signal().await;
    tracing::info!("gateway-brain shutting down");
    shutdown.cancel();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        match sigterm.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
