// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway edge: client/executor WebSocket hubs and the internal HTTP
//! dispatch API. Forwards work onto the bus for a brain process to execute
//! and relays replies back to whichever client or executor is waiting.

pub mod bus_consumer;
pub mod config;
pub mod state;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use gateway_bus::redis_bus::RedisBus;
use gateway_bus::Bus;
use gateway_results::ResultsCache;
use gateway_scheduler::Scheduler;
use gateway_store::memory::InMemoryStore;
use gateway_store::postgres::PostgresStore;
use gateway_store::Store;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::EdgeConfig;
use crate::state::EdgeState;
use crate::transport::build_router;

/// Run the edge server until shutdown.
pub async fn run(config: EdgeConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
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
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&bus), config.agent_stale()));

    let state = EdgeState::new(config, bus, store, results, scheduler, shutdown.clone());

    tracing::info!(edge_id = %state.edge_id, %addr, "gateway-edge listening");
    bus_consumer::spawn(Arc::clone(&state));

    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    let serve_shutdown = shutdown.clone();
    let serve = tokio::spawn(async move {
        axum::serve(listener, router).with_graceful_shutdown(serve_shutdown.cancelled_owned()).await
    });

    shutdown_signal().await;
    tracing::info!("gateway-edge shutting down");
    shutdown.cancel();

    serve.await??;
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
