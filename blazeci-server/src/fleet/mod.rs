//! Runner fleet core
//!
//! This module tree is the heart of the server: it turns webhook-driven
//! demand signals into a bounded pool of ephemeral runner tasks.
//!
//! - `normalizer`: raw webhook JSON -> typed events, replay dedup
//! - `demand`: per-repository job counters
//! - `reconciler`: the runner lifecycle state machine
//! - `scheduler`: one worker per repository driving reconciliation passes
//! - `backend` / `docker`: the compute capability and its Docker impl
//! - `store` / `probe` / `notify`: persistence, demand resync, and
//!   observability capability seams
//!
//! Concurrency model: all state for one repository is owned by its worker
//! task and mutated only through that worker's channel; repositories
//! never share locks.

pub mod backend;
pub mod demand;
pub mod docker;
pub mod normalizer;
pub mod notify;
pub mod probe;
pub mod reconciler;
pub mod scheduler;
pub mod store;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use blazeci_core::domain::event::{JobEvent, WebhookEvent};
use blazeci_core::dto::runner::FleetSnapshot;

use backend::TaskBackend;
use notify::Notifier;
use probe::DemandProbe;
use reconciler::ReconcilerSettings;
use scheduler::{RepoWorker, WorkerMessage};
use store::RunnerStore;

/// Fleet-wide tunables
#[derive(Debug, Clone)]
pub struct FleetSettings {
    /// Period of the global reconciliation tick
    pub reconcile_interval: Duration,

    /// How long a record may sit in Provisioning before it fails
    pub provision_timeout: Duration,

    /// Launch attempts before a record is marked permanently Failed
    pub max_launch_attempts: u32,

    /// First retry delay after a transient launch failure
    pub launch_retry_base: Duration,

    /// Upper bound on the launch retry delay
    pub launch_retry_cap: Duration,

    /// First retry delay for backend status queries within a pass
    pub backend_retry_base: Duration,

    /// Upper bound on the backend query retry delay
    pub backend_retry_cap: Duration,

    /// Backend query attempts per pass before the repo's pass is skipped
    pub backend_attempts: u32,

    /// How long delivery ids are remembered for replay detection
    pub delivery_ttl: Duration,

    /// Maximum remembered delivery ids
    pub delivery_capacity: usize,

    /// Depth of each repository worker's message queue
    pub queue_depth: usize,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(30),
            provision_timeout: Duration::from_secs(120),
            max_launch_attempts: 3,
            launch_retry_base: Duration::from_secs(1),
            launch_retry_cap: Duration::from_secs(30),
            backend_retry_base: Duration::from_secs(1),
            backend_retry_cap: Duration::from_secs(30),
            backend_attempts: 5,
            delivery_ttl: Duration::from_secs(600),
            delivery_capacity: 4096,
            queue_depth: 64,
        }
    }
}

impl FleetSettings {
    pub(crate) fn reconciler(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            provision_timeout: self.provision_timeout,
            max_launch_attempts: self.max_launch_attempts,
            launch_retry_base: self.launch_retry_base,
            launch_retry_cap: self.launch_retry_cap,
        }
    }
}

/// Shared capabilities handed to every worker
pub struct FleetCtx {
    pub store: Arc<dyn RunnerStore>,
    pub backend: Arc<dyn TaskBackend>,
    pub probe: Arc<dyn DemandProbe>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: FleetSettings,

    /// Latest per-repository snapshot, published after each pass
    pub status: RwLock<HashMap<i64, FleetSnapshot>>,
}

/// Entry point of the reconciliation core
///
/// Routes normalized events to per-repository workers, spawning them on
/// first contact, and runs the global tick that keeps reconciliation
/// going when webhooks are quiet.
pub struct FleetManager {
    ctx: Arc<FleetCtx>,
    workers: Mutex<HashMap<i64, mpsc::Sender<WorkerMessage>>>,
    deliveries: normalizer::DeliveryCache,
}

impl FleetManager {
    pub fn new(
        store: Arc<dyn RunnerStore>,
        backend: Arc<dyn TaskBackend>,
        probe: Arc<dyn DemandProbe>,
        notifier: Arc<dyn Notifier>,
        settings: FleetSettings,
    ) -> Self {
        let deliveries =
            normalizer::DeliveryCache::new(settings.delivery_ttl, settings.delivery_capacity);

        Self {
            ctx: Arc::new(FleetCtx {
                store,
                backend,
                probe,
                notifier,
                settings,
                status: RwLock::new(HashMap::new()),
            }),
            workers: Mutex::new(HashMap::new()),
            deliveries,
        }
    }

    /// Normalizes a webhook delivery
    ///
    /// Replays and malformed payloads come back as `Discard`; this method
    /// never fails, which is what lets the webhook endpoint answer 2xx
    /// unconditionally once the signature checks out.
    pub fn normalize(&self, event_type: &str, delivery_id: &str, payload: &Value) -> WebhookEvent {
        if self.deliveries.seen(delivery_id) {
            debug!("Replayed delivery {}, discarding", delivery_id);
            return WebhookEvent::Discard {
                reason: format!("replayed delivery {delivery_id}"),
            };
        }

        match normalizer::normalize(event_type, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping malformed webhook delivery {}: {}", delivery_id, e);
                WebhookEvent::Discard {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Routes a job event to its repository's worker
    pub async fn dispatch_job(&self, event: JobEvent) {
        let repo_id = event.repo.id;
        self.send(repo_id, WorkerMessage::Event(event)).await;
    }

    /// Nudges a repository's worker to reconcile
    pub async fn dispatch_hint(&self, repo_id: i64) {
        self.send(repo_id, WorkerMessage::Hint).await;
    }

    /// Operator-initiated drain of one runner
    pub async fn drain_runner(&self, repo_id: i64, runner_id: Uuid) {
        self.send(repo_id, WorkerMessage::Drain(runner_id)).await;
    }

    /// Operator acknowledgement of a Failed runner
    pub async fn reset_runner(&self, repo_id: i64, runner_id: Uuid) {
        self.send(repo_id, WorkerMessage::Reset(runner_id)).await;
    }

    /// Latest published snapshot for a repository, if any pass ran yet
    pub fn snapshot(&self, repo_id: i64) -> Option<FleetSnapshot> {
        self.ctx.status.read().unwrap().get(&repo_id).cloned()
    }

    /// Spawns workers for known repositories at startup
    pub async fn adopt_repos(&self, repo_ids: Vec<i64>) {
        for repo_id in repo_ids {
            self.send(repo_id, WorkerMessage::Tick).await;
        }
    }

    /// Starts the global reconciliation ticker
    pub fn start_ticker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = manager.ctx.settings.reconcile_interval;

        tokio::spawn(async move {
            info!("Reconciliation ticker started (interval: {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it, workers reconcile
            // on spawn anyway.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let workers = manager.workers.lock().await;
                for (repo_id, tx) in workers.iter() {
                    // A full queue means the worker already has a pass
                    // coming; dropping the tick is fine.
                    if tx.try_send(WorkerMessage::Tick).is_err() {
                        debug!("Worker queue full for repo {}, tick skipped", repo_id);
                    }
                }
            }
        })
    }

    async fn send(&self, repo_id: i64, msg: WorkerMessage) {
        let tx = self.worker_sender(repo_id).await;
        if tx.send(msg).await.is_err() {
            warn!("Worker for repo {} is gone; message dropped", repo_id);
        }
    }

    async fn worker_sender(&self, repo_id: i64) -> mpsc::Sender<WorkerMessage> {
        let mut workers = self.workers.lock().await;

        if let Some(tx) = workers.get(&repo_id) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let (tx, rx) = mpsc::channel(self.ctx.settings.queue_depth);
        let worker = RepoWorker::new(repo_id, Arc::clone(&self.ctx));
        tokio::spawn(worker.run(rx));
        workers.insert(repo_id, tx.clone());
        tx
    }
}
