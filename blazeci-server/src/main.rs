//! BlazeCI Server
//!
//! Manages a fleet of ephemeral GitHub Actions self-hosted runners:
//! - Webhook ingress: verified GitHub deliveries become demand signals
//! - Fleet core: per-repository workers reconcile runner records against
//!   observed task state and the capacity policy
//! - Docker backend: ephemeral runner containers, one job per container
//! - HTTP API: repository configuration and operator commands

pub mod api;
pub mod config;
pub mod db;
pub mod fleet;
pub mod repository;
pub mod service;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blazeci_github::{AppAuth, GitHubClient};

use crate::api::AppState;
use crate::config::Config;
use crate::fleet::FleetManager;
use crate::fleet::docker::{DockerBackend, check_docker_available};
use crate::fleet::notify::LogNotifier;
use crate::fleet::probe::GitHubDemandProbe;
use crate::fleet::store::PgRunnerStore;
use crate::repository::repo_repository;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blazeci_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting BlazeCI server...");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        "Loaded configuration: bind_addr={}, reconcile_interval={:?}",
        config.bind_addr, config.reconcile_interval
    );

    // Docker must be reachable before we promise to launch runners
    check_docker_available().context("Docker backend unavailable")?;

    info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    // GitHub App credentials
    let private_key = std::fs::read(&config.github_app_key_path)
        .with_context(|| format!("Failed to read {}", config.github_app_key_path))?;
    let github = Arc::new(GitHubClient::new(config.github_api_url.clone()));
    let auth = Arc::new(
        AppAuth::new(config.github_app_id.clone(), &private_key)
            .context("Invalid GitHub App credentials")?,
    );

    // Assemble the fleet core
    let backend = Arc::new(DockerBackend::new(
        config.runner_image.clone(),
        Arc::clone(&github),
        Arc::clone(&auth),
    ));
    let store = Arc::new(PgRunnerStore::new(pool.clone()));
    let probe = Arc::new(GitHubDemandProbe::new(Arc::clone(&github), Arc::clone(&auth)));

    let fleet = Arc::new(FleetManager::new(
        store,
        backend,
        probe,
        Arc::new(LogNotifier),
        config.fleet_settings(),
    ));

    // Adopt repositories that were connected before this restart so their
    // records are reconciled even if webhooks stay quiet.
    match repo_repository::list_active_ids(&pool).await {
        Ok(repo_ids) => {
            info!("Adopting {} active repositories", repo_ids.len());
            fleet.adopt_repos(repo_ids).await;
        }
        Err(e) => warn!("Failed to list active repositories: {}", e),
    }

    let _ticker = fleet.start_ticker();

    // Build router with all API endpoints
    let state = AppState {
        pool,
        fleet,
        config: Arc::new(config.clone()),
    };
    let app = api::create_router(state);

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
