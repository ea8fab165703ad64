//! Webhook Ingress Handler
//!
//! Receives GitHub webhook deliveries, verifies their HMAC signature
//! against the per-repository secrets, and hands verified events to the
//! fleet. Contract with GitHub: once a delivery is verified the endpoint
//! answers 2xx no matter what happens downstream, otherwise GitHub keeps
//! retrying and amplifies whatever went wrong.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde_json::json;

use blazeci_core::domain::event::WebhookEvent;
use blazeci_github::signature::verify_signature;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::repository::{repo_repository, webhook_repository};
use crate::service::installation_service;

/// POST /webhooks/github
/// GitHub webhook ingress
pub async fn receive_github(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let event_type = header(&headers, "X-GitHub-Event").unwrap_or_default();
    let delivery_id = header(&headers, "X-GitHub-Delivery").unwrap_or_default();
    let signature = header(&headers, "X-Hub-Signature-256").unwrap_or_default();

    tracing::debug!(
        "Webhook delivery {} ({}, {} bytes)",
        delivery_id,
        event_type,
        body.len()
    );

    // Find the registration whose secret signed this delivery
    let registrations = webhook_repository::list_active(&state.pool).await?;
    let matched = registrations
        .iter()
        .find(|wh| verify_signature(&wh.secret, &body, &signature));

    let Some(matched) = matched else {
        tracing::warn!(
            "Webhook signature verification failed for delivery {} ({})",
            delivery_id,
            event_type
        );
        return Err(ApiError::Unauthorized("invalid signature".to_string()));
    };

    tracing::debug!(
        "Verified {} delivery for repo {}",
        event_type,
        matched.repo_id
    );

    // From here on nothing may fail the request
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Dropping undecodable webhook delivery {}: {}", delivery_id, e);
            return Ok(Json(json!({ "ok": false, "event": event_type })));
        }
    };

    let installation_id = payload
        .get("installation")
        .and_then(|i| i.get("id"))
        .and_then(serde_json::Value::as_i64);

    match state.fleet.normalize(&event_type, &delivery_id, &payload) {
        WebhookEvent::Job(event) => {
            ensure_repo(&state, &event.repo, installation_id).await;
            state.fleet.dispatch_job(event).await;
        }
        WebhookEvent::Hint { repo } => {
            ensure_repo(&state, &repo, installation_id).await;
            let repo_id = repo.id;
            state.fleet.dispatch_hint(repo_id).await;
        }
        WebhookEvent::Installation(event) => {
            if let Err(e) = installation_service::apply(&state.pool, &event).await {
                tracing::error!("Failed to apply installation event: {}", e);
            }
        }
        WebhookEvent::Discard { reason } => {
            tracing::debug!("Discarding delivery {}: {}", delivery_id, reason);
        }
    }

    Ok(Json(json!({ "ok": true, "event": event_type })))
}

/// Makes sure a verified repository has a config row to reconcile against
async fn ensure_repo(
    state: &AppState,
    repo: &blazeci_core::domain::event::RepoRef,
    installation_id: Option<i64>,
) {
    if let Err(e) = repo_repository::ensure_exists(
        &state.pool,
        repo,
        installation_id,
        state.config.default_max_runners,
        &state.config.default_runner_labels,
    )
    .await
    {
        tracing::error!("Failed to register repo {}: {}", repo.full_name(), e);
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
