//! Webhook event normalizer
//!
//! Converts raw GitHub webhook payloads into the [`WebhookEvent`] sum type
//! and screens out replayed deliveries. GitHub delivers webhooks at least
//! once and retries on timeouts, so the same delivery id can arrive more
//! than once; a bounded TTL cache makes replays a `Discard` before they
//! reach the demand tracker.
//!
//! Malformed payloads are an error for the caller to log and drop; they
//! must never propagate to the HTTP layer, which has to answer 2xx to keep
//! GitHub from retry-storming us.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use blazeci_core::domain::event::{
    InstallationAction, InstallationEvent, JobAction, JobEvent, RepoRef, WebhookEvent,
};

/// A payload missing fields the fleet cannot work without
#[derive(Debug, Error)]
#[error("malformed {event} payload: missing {missing}")]
pub struct MalformedPayload {
    pub event: String,
    pub missing: &'static str,
}

/// Normalizes one webhook delivery
///
/// The caller has already verified the delivery signature and checked the
/// delivery id against the [`DeliveryCache`].
pub fn normalize(event_type: &str, payload: &Value) -> Result<WebhookEvent, MalformedPayload> {
    match event_type {
        "workflow_job" => normalize_workflow_job(payload),
        "check_run" => Ok(WebhookEvent::Hint {
            repo: repo_ref(payload, event_type)?,
        }),
        "workflow_run" => normalize_workflow_run(payload),
        "installation" => normalize_installation(payload),
        "ping" => Ok(discard("ping")),
        "push" => Ok(discard("push is covered by workflow events")),
        "installation_repositories" => {
            Ok(discard("repository selection changes are picked up per event"))
        }
        other => Ok(discard(format!("unrecognized event type: {other}"))),
    }
}

fn discard(reason: impl Into<String>) -> WebhookEvent {
    WebhookEvent::Discard {
        reason: reason.into(),
    }
}

fn normalize_workflow_job(payload: &Value) -> Result<WebhookEvent, MalformedPayload> {
    let action = match payload.get("action").and_then(Value::as_str) {
        Some("queued") => JobAction::Queued,
        Some("in_progress") => JobAction::InProgress,
        Some("completed") => JobAction::Completed,
        Some(other) => return Ok(discard(format!("workflow_job action: {other}"))),
        None => return Err(missing("workflow_job", "action")),
    };

    let job = payload
        .get("workflow_job")
        .ok_or_else(|| missing("workflow_job", "workflow_job"))?;

    let job_id = job
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| missing("workflow_job", "workflow_job.id"))?;

    let run_id = job
        .get("run_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| missing("workflow_job", "workflow_job.run_id"))?;

    let labels = job
        .get("labels")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let runner_name = job
        .get("runner_name")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(WebhookEvent::Job(JobEvent {
        repo: repo_ref(payload, "workflow_job")?,
        job_id,
        run_id,
        action,
        labels,
        runner_name,
        occurred_at: Utc::now(),
    }))
}

fn normalize_workflow_run(payload: &Value) -> Result<WebhookEvent, MalformedPayload> {
    match payload.get("action").and_then(Value::as_str) {
        Some("requested") => Ok(WebhookEvent::Hint {
            repo: repo_ref(payload, "workflow_run")?,
        }),
        Some(other) => Ok(discard(format!("workflow_run action: {other}"))),
        None => Err(missing("workflow_run", "action")),
    }
}

fn normalize_installation(payload: &Value) -> Result<WebhookEvent, MalformedPayload> {
    let action = match payload.get("action").and_then(Value::as_str) {
        Some("created") => InstallationAction::Created,
        Some("deleted") => InstallationAction::Deleted,
        Some(other) => return Ok(discard(format!("installation action: {other}"))),
        None => return Err(missing("installation", "action")),
    };

    let installation = payload
        .get("installation")
        .ok_or_else(|| missing("installation", "installation"))?;

    let installation_id = installation
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| missing("installation", "installation.id"))?;

    let account = installation
        .get("account")
        .ok_or_else(|| missing("installation", "installation.account"))?;

    let account_login = account
        .get("login")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("installation", "installation.account.login"))?
        .to_string();

    let account_type = account
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("User")
        .to_string();

    Ok(WebhookEvent::Installation(InstallationEvent {
        action,
        installation_id,
        account_login,
        account_type,
    }))
}

fn repo_ref(payload: &Value, event: &str) -> Result<RepoRef, MalformedPayload> {
    let repository = payload
        .get("repository")
        .ok_or_else(|| missing_owned(event, "repository"))?;

    let id = repository
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| missing_owned(event, "repository.id"))?;

    let name = repository
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| missing_owned(event, "repository.name"))?
        .to_string();

    let owner = repository
        .get("owner")
        .and_then(|o| o.get("login"))
        .and_then(Value::as_str)
        .ok_or_else(|| missing_owned(event, "repository.owner.login"))?
        .to_string();

    Ok(RepoRef { id, owner, name })
}

fn missing(event: &'static str, field: &'static str) -> MalformedPayload {
    MalformedPayload {
        event: event.to_string(),
        missing: field,
    }
}

fn missing_owned(event: &str, field: &'static str) -> MalformedPayload {
    MalformedPayload {
        event: event.to_string(),
        missing: field,
    }
}

/// Bounded cache of recently seen delivery ids
///
/// Entries expire after the TTL; when the cache is full the oldest entry
/// is evicted so an attacker (or a retry storm) cannot grow it without
/// bound.
pub struct DeliveryCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<HashMap<String, Instant>>,
}

impl DeliveryCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Records a delivery id; returns true if it was already seen
    pub fn seen(&self, delivery_id: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        inner.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);

        if inner.contains_key(delivery_id) {
            return true;
        }

        if inner.len() >= self.capacity {
            if let Some(oldest) = inner
                .iter()
                .min_by_key(|(_, seen_at)| **seen_at)
                .map(|(id, _)| id.clone())
            {
                inner.remove(&oldest);
            }
        }

        inner.insert(delivery_id.to_string(), now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow_job_payload(action: &str) -> Value {
        json!({
            "action": action,
            "workflow_job": {
                "id": 118,
                "run_id": 9001,
                "labels": ["self-hosted", "blazeci-small"],
                "runner_name": null
            },
            "repository": {
                "id": 77,
                "name": "widgets",
                "owner": { "login": "acme" }
            }
        })
    }

    #[test]
    fn test_workflow_job_queued_normalizes() {
        let event = normalize("workflow_job", &workflow_job_payload("queued")).unwrap();

        let WebhookEvent::Job(job) = event else {
            panic!("expected Job event");
        };
        assert_eq!(job.repo.id, 77);
        assert_eq!(job.repo.full_name(), "acme/widgets");
        assert_eq!(job.job_id, 118);
        assert_eq!(job.run_id, 9001);
        assert_eq!(job.action, JobAction::Queued);
        assert_eq!(job.labels, vec!["self-hosted", "blazeci-small"]);
        assert!(job.runner_name.is_none());
    }

    #[test]
    fn test_workflow_job_waiting_is_discarded() {
        let event = normalize("workflow_job", &workflow_job_payload("waiting")).unwrap();
        assert!(matches!(event, WebhookEvent::Discard { .. }));
    }

    #[test]
    fn test_workflow_job_without_id_is_malformed() {
        let payload = json!({
            "action": "queued",
            "workflow_job": { "run_id": 9001 },
            "repository": { "id": 77, "name": "widgets", "owner": { "login": "acme" } }
        });

        let err = normalize("workflow_job", &payload).unwrap_err();
        assert_eq!(err.missing, "workflow_job.id");
    }

    #[test]
    fn test_check_run_becomes_hint() {
        let payload = json!({
            "action": "created",
            "check_run": { "id": 3 },
            "repository": { "id": 77, "name": "widgets", "owner": { "login": "acme" } }
        });

        let event = normalize("check_run", &payload).unwrap();
        assert!(matches!(event, WebhookEvent::Hint { repo } if repo.id == 77));
    }

    #[test]
    fn test_workflow_run_requested_becomes_hint() {
        let payload = json!({
            "action": "requested",
            "repository": { "id": 77, "name": "widgets", "owner": { "login": "acme" } }
        });

        assert!(matches!(
            normalize("workflow_run", &payload).unwrap(),
            WebhookEvent::Hint { .. }
        ));

        let payload = json!({
            "action": "completed",
            "repository": { "id": 77, "name": "widgets", "owner": { "login": "acme" } }
        });

        assert!(matches!(
            normalize("workflow_run", &payload).unwrap(),
            WebhookEvent::Discard { .. }
        ));
    }

    #[test]
    fn test_installation_created_normalizes() {
        let payload = json!({
            "action": "created",
            "installation": {
                "id": 42,
                "account": { "login": "acme", "type": "Organization" }
            }
        });

        let event = normalize("installation", &payload).unwrap();
        let WebhookEvent::Installation(installation) = event else {
            panic!("expected Installation event");
        };
        assert_eq!(installation.action, InstallationAction::Created);
        assert_eq!(installation.installation_id, 42);
        assert_eq!(installation.account_login, "acme");
        assert_eq!(installation.account_type, "Organization");
    }

    #[test]
    fn test_ping_and_unknown_events_are_discarded() {
        assert!(matches!(
            normalize("ping", &json!({})).unwrap(),
            WebhookEvent::Discard { .. }
        ));
        assert!(matches!(
            normalize("star", &json!({})).unwrap(),
            WebhookEvent::Discard { .. }
        ));
    }

    #[test]
    fn test_delivery_cache_flags_replays() {
        let cache = DeliveryCache::new(Duration::from_secs(60), 16);

        assert!(!cache.seen("d-1"));
        assert!(cache.seen("d-1"));
        assert!(!cache.seen("d-2"));
    }

    #[test]
    fn test_delivery_cache_is_bounded() {
        let cache = DeliveryCache::new(Duration::from_secs(60), 2);

        assert!(!cache.seen("d-1"));
        assert!(!cache.seen("d-2"));
        // Inserting a third evicts the oldest instead of growing
        assert!(!cache.seen("d-3"));
        assert!(!cache.seen("d-1"));
    }

    #[test]
    fn test_delivery_cache_expires_entries() {
        let cache = DeliveryCache::new(Duration::from_millis(0), 16);

        assert!(!cache.seen("d-1"));
        // TTL of zero means everything is already expired on the next call
        assert!(!cache.seen("d-1"));
    }
}
