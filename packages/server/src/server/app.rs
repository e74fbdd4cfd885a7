//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::domains::ingest::{self, WebhookState};
use crate::domains::jobs::{AnalyticsBatchConsumer, QueueConsumer};
use crate::kernel::ServerDeps;
use crate::server::middleware::drain_auth_middleware;
use crate::server::routes::{drain_analytics_handler, drain_jobs_handler, health_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// None when the app runs on in-memory dependencies
    pub db_pool: Option<PgPool>,
    pub server_deps: ServerDeps,
    pub consumer: Arc<QueueConsumer>,
    pub analytics: Arc<AnalyticsBatchConsumer>,
    pub drain_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(db_pool: Option<PgPool>, server_deps: ServerDeps, drain_secret: Option<String>) -> Self {
        Self {
            db_pool,
            consumer: Arc::new(QueueConsumer::standard(server_deps.clone())),
            analytics: Arc::new(AnalyticsBatchConsumer::new(server_deps.clone())),
            server_deps,
            drain_secret: drain_secret.map(Arc::from),
        }
    }
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    let webhooks = ingest::router(WebhookState::new(state.server_deps.clone()));

    let drain_routes = Router::new()
        .route("/jobs/drain", post(drain_jobs_handler))
        .route("/jobs/analytics/drain", post(drain_analytics_handler))
        .route_layer(middleware::from_fn_with_state(
            state.drain_secret.clone(),
            drain_auth_middleware,
        ));

    Router::new()
        .merge(webhooks)
        .merge(drain_routes)
        .route("/health", get(health_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
