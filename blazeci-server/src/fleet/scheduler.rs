//! Per-repository reconciliation worker
//!
//! Each repository gets one worker task fed by an mpsc channel. The
//! channel is the serialization point: demand updates, periodic ticks,
//! and operator commands for a repository all pass through it in order,
//! so the demand counters and the record set never see concurrent
//! mutation. Workers for different repositories run fully in parallel.
//!
//! Rapid bursts of triggers (a webhook storm) collapse into a single
//! reconciliation pass: the worker drains everything queued on the
//! channel before reconciling.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blazeci_core::domain::event::JobEvent;
use blazeci_core::domain::repo::RepoConfig;
use blazeci_core::domain::runner::RunnerState;
use blazeci_core::dto::runner::FleetSnapshot;
use blazeci_core::policy::{self, ScaleDecision};

use crate::fleet::FleetCtx;
use crate::fleet::backend::{LaunchSpec, TaskStatus};
use crate::fleet::demand::{ApplyOutcome, DemandTracker};
use crate::fleet::reconciler::{Reconciler, Transition};

/// Commands and signals a repository worker consumes
#[derive(Debug)]
pub enum WorkerMessage {
    /// Normalized job event for this repository
    Event(JobEvent),

    /// Coarse activity signal; reconcile without touching demand
    Hint,

    /// Periodic reconciliation tick
    Tick,

    /// Operator-initiated drain of one runner
    Drain(Uuid),

    /// Operator acknowledgement of a Failed runner
    Reset(Uuid),
}

pub(crate) struct RepoWorker {
    repo_id: i64,
    ctx: Arc<FleetCtx>,
    demand: DemandTracker,
    reconciler: Reconciler,
    config: Option<RepoConfig>,
    loaded: bool,

    /// Handles we already issued a terminate for; cleared on transient
    /// failure so the next pass retries, and on record pruning.
    terminate_issued: HashSet<Uuid>,
}

impl RepoWorker {
    pub(crate) fn new(repo_id: i64, ctx: Arc<FleetCtx>) -> Self {
        let reconciler = Reconciler::new(repo_id, ctx.settings.reconciler());
        Self {
            repo_id,
            ctx,
            demand: DemandTracker::default(),
            reconciler,
            config: None,
            loaded: false,
            terminate_issued: HashSet::new(),
        }
    }

    /// Runs the worker until every sender is dropped
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<WorkerMessage>) {
        debug!("Worker started for repo {}", self.repo_id);
        self.ensure_loaded().await;

        while let Some(msg) = rx.recv().await {
            let mut should_reconcile = self.apply_message(msg);

            // Debounce: collapse whatever else is already queued into the
            // same pass.
            while let Ok(msg) = rx.try_recv() {
                should_reconcile |= self.apply_message(msg);
            }

            if should_reconcile {
                self.reconcile_pass().await;
            }
        }

        debug!("Worker stopped for repo {}", self.repo_id);
    }

    /// Applies one message to local state; returns whether to reconcile
    pub(crate) fn apply_message(&mut self, msg: WorkerMessage) -> bool {
        match msg {
            WorkerMessage::Event(event) => {
                let outcome = self.demand.apply(self.config.as_ref(), &event);
                if outcome == ApplyOutcome::Skipped {
                    return false;
                }
                self.reconciler.note_job(&event);
                true
            }
            WorkerMessage::Hint | WorkerMessage::Tick => true,
            WorkerMessage::Drain(runner_id) => {
                match self.reconciler.mark_draining(runner_id, "operator request") {
                    Some(transition) => self.notify(&transition),
                    None => debug!(
                        "Drain of runner {} for repo {} is a no-op",
                        runner_id, self.repo_id
                    ),
                }
                true
            }
            WorkerMessage::Reset(runner_id) => {
                match self.reconciler.acknowledge_failed(runner_id) {
                    Some(transition) => self.notify(&transition),
                    None => debug!(
                        "Reset of runner {} for repo {} is a no-op",
                        runner_id, self.repo_id
                    ),
                }
                true
            }
        }
    }

    /// Loads persisted records and configuration on first run
    async fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }

        match self.ctx.store.load_records(self.repo_id).await {
            Ok(records) => {
                if !records.is_empty() {
                    info!(
                        "Recovered {} runner record(s) for repo {}",
                        records.len(),
                        self.repo_id
                    );
                }
                self.reconciler.load(records);
                self.loaded = true;
            }
            Err(e) => {
                warn!(
                    "Failed to load runner records for repo {}: {}",
                    self.repo_id, e
                );
            }
        }

        self.refresh_config().await;
    }

    async fn refresh_config(&mut self) {
        match self.ctx.store.load_repo_config(self.repo_id).await {
            Ok(Some(config)) => self.config = Some(config),
            Ok(None) => debug!("Repo {} has no stored configuration yet", self.repo_id),
            Err(e) => warn!("Failed to load config for repo {}: {}", self.repo_id, e),
        }
    }

    /// One full reconciliation pass
    pub(crate) async fn reconcile_pass(&mut self) {
        self.ensure_loaded().await;
        if !self.loaded {
            warn!("Skipping pass for repo {}: records not loaded", self.repo_id);
            return;
        }

        self.refresh_config().await;
        let Some(config) = self.config.clone() else {
            debug!("Skipping pass for repo {}: unknown repository", self.repo_id);
            return;
        };
        if !config.active {
            debug!("Skipping pass for repo {}: repository inactive", self.repo_id);
            return;
        }

        // (1) Observe the backend. Exhausted retries skip this repo's pass
        // without touching any state; other repositories are unaffected.
        let Some(statuses) = self.fetch_statuses().await else {
            warn!(
                "Skipping pass for repo {}: backend queries exhausted retries",
                self.repo_id
            );
            return;
        };

        // (2) Drive state transitions from observations.
        let now = Utc::now();
        let mut transitions = self.reconciler.observe(&statuses, now);
        transitions.extend(self.reconciler.check_provision_timeouts(now));
        for transition in &transitions {
            self.notify(transition);
        }

        // Best-effort cleanup of tasks behind records that just closed.
        self.reap_closed(&transitions).await;

        // (3) Resync demand if the counters clamped since the last pass.
        self.maybe_resync_demand(&config).await;

        // (4) Policy: decide and act.
        let live = self.reconciler.live_count();
        let decision = policy::decide(self.demand.snapshot(), live, config.max_runners);
        match decision {
            ScaleDecision::ScaleUp(count) => self.scale_up(&config, count),
            ScaleDecision::ScaleDown(count) => self.scale_down(count).await,
            ScaleDecision::Hold => {}
        }

        // (5) Launch fresh and retry-due provisioning records.
        self.launch_due(&config).await;

        // (6) Terminate draining records (idempotent per record).
        self.terminate_draining().await;

        // (7) Persist every record touched this pass, then prune.
        self.persist_dirty().await;
        for id in self.reconciler.prune_terminal() {
            self.terminate_issued.remove(&id);
        }

        self.publish_snapshot();
    }

    /// Queries the backend for all known task handles, with backoff
    ///
    /// Returns None when the retry budget is exhausted.
    async fn fetch_statuses(&self) -> Option<HashMap<String, TaskStatus>> {
        let handles = self.reconciler.handles();
        if handles.is_empty() {
            return Some(HashMap::new());
        }

        let settings = &self.ctx.settings;
        let mut delay = settings.backend_retry_base;

        for attempt in 1..=settings.backend_attempts {
            match self.try_fetch_statuses(&handles).await {
                Ok(statuses) => return Some(statuses),
                Err(e) => {
                    if attempt == settings.backend_attempts {
                        warn!(
                            "Backend status query failed after {} attempt(s) for repo {}: {}",
                            attempt, self.repo_id, e
                        );
                        return None;
                    }
                    debug!(
                        "Backend status query failed (attempt {}/{}) for repo {}: {}; retrying in {:?}",
                        attempt, settings.backend_attempts, self.repo_id, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(settings.backend_retry_cap);
                }
            }
        }

        None
    }

    async fn try_fetch_statuses(
        &self,
        handles: &[String],
    ) -> Result<HashMap<String, TaskStatus>, crate::fleet::backend::BackendError> {
        let mut statuses = HashMap::new();
        for handle in handles {
            match self.ctx.backend.status(handle).await {
                Ok(status) => {
                    statuses.insert(handle.clone(), status);
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    // A permanent query rejection means the backend will
                    // never answer for this handle; treat the task as gone.
                    warn!("Backend rejected status query for {}: {}", handle, e);
                    statuses.insert(handle.clone(), TaskStatus::NotFound);
                }
            }
        }
        Ok(statuses)
    }

    /// Reaps backend tasks for records that just reached Terminated/Failed
    ///
    /// Covers tasks that closed without a prior terminate: clean
    /// self-exits and provisioning timeouts. Records whose terminate was
    /// already issued while Draining are skipped so a closed record never
    /// causes a second backend call.
    async fn reap_closed(&mut self, transitions: &[Transition]) {
        for transition in transitions {
            if !matches!(
                transition.to,
                RunnerState::Terminated | RunnerState::Failed
            ) {
                continue;
            }
            if self.terminate_issued.contains(&transition.runner_id) {
                continue;
            }
            let Some(handle) = self
                .reconciler
                .record(transition.runner_id)
                .and_then(|r| r.task_handle.clone())
            else {
                continue;
            };
            if let Err(e) = self.ctx.backend.terminate(&handle).await {
                debug!("Reap of task {} failed: {}", handle, e);
            }
            self.terminate_issued.insert(transition.runner_id);
        }
    }

    async fn maybe_resync_demand(&mut self, config: &RepoConfig) {
        let Some(run_id) = self.demand.take_anomaly_run() else {
            return;
        };

        match self.ctx.probe.run_job_counts(config, run_id).await {
            Ok((queued, in_progress)) => self.demand.resync(queued, in_progress),
            Err(e) => {
                // Clamped counters are still safe to act on; try again only
                // if another anomaly fires.
                warn!("Demand resync failed for {}: {}", config.full_name(), e);
            }
        }
    }

    fn scale_up(&mut self, config: &RepoConfig, count: u32) {
        if self.reconciler.has_failed_hold() {
            self.ctx.notifier.anomaly(
                self.repo_id,
                "scale-up held: failed runner awaiting operator reset",
            );
            return;
        }

        info!(
            "Scaling up {} by {} runner(s) (live {}, max {})",
            config.full_name(),
            count,
            self.reconciler.live_count(),
            config.max_runners
        );

        for _ in 0..count {
            self.reconciler
                .begin_provision(config.allowed_labels.clone());
        }
    }

    async fn scale_down(&mut self, count: u32) {
        let victims = self.reconciler.select_idle(count);
        if victims.len() < count as usize {
            debug!(
                "Scale-down of {} deferred: only {} idle runner(s) for repo {}",
                count,
                victims.len(),
                self.repo_id
            );
        }

        for id in victims {
            if let Some(transition) = self.reconciler.mark_draining(id, "scale-down") {
                self.notify(&transition);
            }
        }
    }

    /// Launches provisioning records that are due (fresh or retry-due)
    async fn launch_due(&mut self, config: &RepoConfig) {
        let now = Utc::now();
        for id in self.reconciler.due_launches(now) {
            let Some(record) = self.reconciler.record(id) else {
                continue;
            };

            let spec = LaunchSpec {
                repo_id: config.id,
                owner: config.owner.clone(),
                repo: config.name.clone(),
                installation_id: config.installation_id,
                runner_name: record.runner_name(),
                labels: record.labels.clone(),
                trigger: format!(
                    "demand: {} queued, {} in progress",
                    self.demand.snapshot().queued_jobs,
                    self.demand.snapshot().in_progress_jobs
                ),
            };

            match self.ctx.backend.launch(&spec).await {
                Ok(handle) => {
                    info!("Launched task {} for runner {}", handle, spec.runner_name);
                    self.reconciler.attach_handle(id, handle);
                }
                Err(e) => {
                    warn!("Launch failed for runner {}: {}", spec.runner_name, e);
                    if let Some(transition) =
                        self.reconciler.launch_failed(id, e.is_transient(), Utc::now())
                    {
                        self.notify(&transition);
                    }
                }
            }
        }
    }

    /// Issues terminate for draining records, once per record
    async fn terminate_draining(&mut self) {
        let draining: Vec<(Uuid, String)> = self
            .reconciler
            .records()
            .filter(|r| r.state == RunnerState::Draining)
            .filter(|r| !self.terminate_issued.contains(&r.id))
            .filter_map(|r| r.task_handle.clone().map(|h| (r.id, h)))
            .collect();

        for (id, handle) in draining {
            match self.ctx.backend.terminate(&handle).await {
                Ok(()) => {
                    self.terminate_issued.insert(id);
                }
                Err(e) if e.is_transient() => {
                    warn!("Terminate of task {} failed, will retry: {}", handle, e);
                }
                Err(e) => {
                    warn!("Terminate of task {} rejected: {}", handle, e);
                    if let Some(transition) = self
                        .reconciler
                        .mark_failed(id, "terminate rejected by backend")
                    {
                        self.notify(&transition);
                    }
                }
            }
        }
    }

    async fn persist_dirty(&mut self) {
        for record in self.reconciler.take_dirty() {
            if let Err(e) = self.ctx.store.save_record(&record).await {
                warn!(
                    "Failed to persist runner {} for repo {}: {}",
                    record.id, self.repo_id, e
                );
            }
        }
    }

    fn publish_snapshot(&self) {
        let counter = self.demand.snapshot();
        let snapshot = FleetSnapshot {
            repo_id: self.repo_id,
            queued_jobs: counter.queued_jobs,
            in_progress_jobs: counter.in_progress_jobs,
            live_runners: self.reconciler.live_count(),
            updated_at: Utc::now(),
        };

        self.ctx
            .status
            .write()
            .unwrap()
            .insert(self.repo_id, snapshot);
    }

    fn notify(&self, transition: &Transition) {
        if let Some(record) = self.reconciler.record(transition.runner_id) {
            self.ctx.notifier.runner_transition(
                record,
                transition.from,
                transition.to,
                &transition.reason,
            );
        }
    }
}
