// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the edge listener.

pub mod auth;
pub mod http;
pub mod ws_client;
pub mod ws_executor;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::EdgeState;

pub fn build_router(state: Arc<EdgeState>) -> Router {
    Router::new()
        .route("/healthz", get(http::healthz))
        .route("/internal/v1/dispatch", post(http::dispatch))
        .route("/internal/v1/dispatch-async", post(http::dispatch_async))
        .route("/internal/v1/results/{requestId}", get(http::results))
        .route("/internal/v1/executors/routes", get(http::executor_routes))
        .route("/internal/v1/sessions/send", post(http::sessions_send))
        .route("/internal/v1/channels/test-send", post(http::channels_test_send))
        .route("/ingress/channels/{channelId}/{accountKey}", post(http::ingress_channel))
        .route("/ws/client", get(ws_client::upgrade))
        .route("/ws/executor", get(ws_executor::upgrade))
        .layer(middleware::from_fn_with_state(state.clone(), auth::service_auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
