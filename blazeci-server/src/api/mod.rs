//! API Module
//!
//! HTTP API layer for the server.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod repo;
pub mod runner;
pub mod webhook;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::fleet::FleetManager;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub fleet: Arc<FleetManager>,
    pub config: Arc<Config>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Webhook ingress
        .route("/webhooks/github", post(webhook::receive_github))
        // Repository endpoints
        .route("/api/repos", get(repo::list_repos))
        .route("/api/repos/{id}", get(repo::get_repo))
        .route("/api/repos/{id}/config", put(repo::update_config))
        .route("/api/repos/{id}/webhook", post(repo::register_webhook))
        .route("/api/repos/{id}/runners", get(runner::repo_fleet))
        // Runner endpoints
        .route("/api/runners/{id}", delete(runner::drain_runner))
        .route("/api/runners/{id}/reset", post(runner::reset_runner))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
