// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Localhost HTTP API: chat streaming, run queries, billing, health.

mod handlers;

use crate::daemon::Daemon;
use axum::extract::State;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Pending long-message payloads exchanged for short stream tokens.
pub(crate) struct TokenTable {
    entries: Mutex<HashMap<String, (handlers::StreamInitBody, Instant)>>,
}

/// Stream tokens expire after ten minutes.
const TOKEN_TTL: std::time::Duration = std::time::Duration::from_secs(600);

impl TokenTable {
    fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn insert(&self, body: handlers::StreamInitBody) -> String {
        let token = nanoid::nanoid!(16);
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, (_, t)| now - *t < TOKEN_TTL);
        entries.insert(token.clone(), (body, now));
        token
    }

    pub(crate) fn take(&self, token: &str) -> Option<handlers::StreamInitBody> {
        let mut entries = self.entries.lock();
        let (body, created) = entries.remove(token)?;
        if created.elapsed() >= TOKEN_TTL {
            return None;
        }
        Some(body)
    }
}

/// Shared state for all handlers.
#[derive(Clone)]
pub(crate) struct HttpState {
    pub daemon: Arc<Daemon>,
    pub tokens: Arc<TokenTable>,
}

/// Build the router.
pub fn router(daemon: Arc<Daemon>) -> Router {
    let state = HttpState { daemon, tokens: Arc::new(TokenTable::new()) };
    Router::new()
        .route("/v1/projects", get(handlers::list_projects).post(handlers::create_project))
        .route("/v1/chat/sessions", post(handlers::ensure_session))
        .route("/v1/chat/stream", get(handlers::chat_stream))
        .route("/v1/chat/stream/init", post(handlers::stream_init))
        .route("/v1/chat/plan/confirm", post(handlers::plan_confirm))
        .route("/v1/context/clear", post(handlers::context_clear))
        .route("/v1/runs", get(handlers::list_runs))
        .route("/v1/runs/:run_id/graph", get(handlers::run_graph))
        .route("/v1/runs/:run_id/nodes/:node_id", get(handlers::run_node))
        .route("/v1/runs/:run_id/artifacts", get(handlers::run_artifacts))
        .route("/v1/logs/query", get(handlers::logs_query))
        .route("/v1/events/query", get(handlers::events_query))
        .route("/v1/billing/summary", get(handlers::billing_summary))
        .route("/v1/billing/stream", get(handlers::billing_stream))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .with_state(state)
}

/// Count every request and its outcome for `/health` and `/metrics`.
async fn track_metrics(
    State(state): State<HttpState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    state.daemon.metrics.record(response.status().is_server_error() || response.status().is_client_error());
    response
}

/// Serve on localhost until the token cancels.
pub async fn serve(
    daemon: Arc<Daemon>,
    port: u16,
    cancel: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http listener started");
    axum::serve(listener, router(daemon))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

#[cfg(test)]
#[path = "../http_tests.rs"]
mod tests;
