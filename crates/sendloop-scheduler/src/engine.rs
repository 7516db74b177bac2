//! Scheduler engine — one per tenant. Owns the timer arena, the job
//! lifecycle state table, and the arm/fire/complete transitions.
//!
//! Every armed job is one spawned tokio task sleeping until its fire
//! instant. The timer arena maps job id → abort handle with a single
//! ownership rule: only this engine mutates it, and re-arming always
//! drops any pre-existing handle first, so there are never two live
//! timers for the same id.
//!
//! A firing that errors is logged and left un-armed until the next
//! `reschedule_all` pass (the platform runs one on every transport
//! `ready` transition). This is a deliberate fail-safe against infinite
//! error loops, not an oversight.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use sendloop_core::error::{Result, SendloopError};

use crate::job::{DispatchReport, Job, JobState, RepeatPolicy};
use crate::queue::{DispatchQueue, DispatchTask};
use crate::recurrence::{compute_next_fire, NextFire};
use crate::store::JobStore;
use crate::window;

/// The per-tenant scheduling engine.
pub struct JobScheduler {
    tenant: String,
    store: Mutex<JobStore>,
    queue: Arc<DispatchQueue>,
    /// Timer arena: job id → opaque cancellation token.
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Explicit lifecycle state per armed job.
    states: Mutex<HashMap<String, JobState>>,
}

impl JobScheduler {
    pub fn new(tenant: impl Into<String>, store: JobStore, queue: Arc<DispatchQueue>) -> Arc<Self> {
        Arc::new(Self {
            tenant: tenant.into(),
            store: Mutex::new(store),
            queue,
            timers: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        })
    }

    /// Validate, persist, and arm a new job.
    pub async fn create_job(self: &Arc<Self>, job: Job) -> Result<Job> {
        job.validate()?;
        self.store.lock().await.upsert(&job)?;
        self.arm(job.clone()).await?;
        tracing::info!(
            "📅 [{}] job {} created ({} recipients, {})",
            self.tenant,
            job.id,
            job.recipients.len(),
            job.repeat
        );
        // Re-read so the caller sees the persisted next_run_at.
        Ok(self.store.lock().await.get(&job.id).unwrap_or(job))
    }

    /// Re-validate, persist, and re-arm an existing job.
    pub async fn update_job(self: &Arc<Self>, job: Job) -> Result<()> {
        job.validate()?;
        if self.store.lock().await.get(&job.id).is_none() {
            return Err(SendloopError::scheduler(format!("unknown job {}", job.id)));
        }
        self.store.lock().await.upsert(&job)?;
        self.arm(job).await
    }

    /// Cancel the timer synchronously and remove the record. An in-flight
    /// dispatch already handed to the queue finishes sending, but its
    /// completion finds no record and writes nothing back.
    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        self.cancel_timer(id).await;
        self.states.lock().await.remove(id);
        let existed = self.store.lock().await.remove(id)?;
        if existed {
            tracing::info!("🗑 [{}] job {id} deleted", self.tenant);
        }
        Ok(existed)
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.store.lock().await.load()
    }

    pub async fn get_job(&self, id: &str) -> Option<Job> {
        self.store.lock().await.get(id)
    }

    pub async fn job_count(&self) -> usize {
        self.store.lock().await.load().len()
    }

    /// Current lifecycle state, if the job is live in this engine.
    pub async fn state_of(&self, id: &str) -> Option<JobState> {
        self.states.lock().await.get(id).copied()
    }

    /// Arm every valid persisted job. Called when the transport reports
    /// ready (including reconnects) — also the recovery path for timers
    /// dropped by the firing fail-safe.
    pub async fn reschedule_all(self: &Arc<Self>) {
        let jobs = self.store.lock().await.load();
        tracing::info!("⏰ [{}] rescheduling {} persisted jobs", self.tenant, jobs.len());
        for job in jobs {
            if let Err(e) = job.validate() {
                tracing::warn!("⚠️ [{}] job {}: skipping invalid record: {e}", self.tenant, job.id);
                continue;
            }
            if let Err(e) = self.arm(job.clone()).await {
                tracing::error!("🛑 [{}] job {}: failed to arm: {e}", self.tenant, job.id);
            }
        }
    }

    /// Stop-keyword routing: cancel every job whose keyword appears in
    /// the reply body and whose recipient set contains the sender.
    /// Returns the cancelled job ids.
    pub async fn cancel_for_reply(&self, from_address: &str, body: &str) -> Vec<String> {
        let jobs = self.store.lock().await.load();
        let mut cancelled = Vec::new();
        for job in jobs {
            if !job.matches_stop_reply(from_address, body) {
                continue;
            }
            match self.delete_job(&job.id).await {
                Ok(true) => {
                    tracing::info!(
                        "🛑 [{}] job {}: stop keyword in reply from {from_address}, cancelled",
                        self.tenant,
                        job.id
                    );
                    cancelled.push(job.id);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("[{}] job {}: cancel failed: {e}", self.tenant, job.id)
                }
            }
        }
        cancelled
    }

    /// Abort all timers. Jobs stay persisted; a later `reschedule_all`
    /// brings them back.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        drop(timers);
        self.states.lock().await.clear();
        tracing::info!("⏸ [{}] scheduler stopped ({count} timers aborted)", self.tenant);
    }

    /// Delete the tenant's persisted collection. Call after `shutdown`.
    pub async fn purge_store(&self) -> Result<()> {
        self.store.lock().await.purge()
    }

    /// Set (or replace) the timer for a job. For interval policies the
    /// computed fire instant is persisted as `next_run_at` first, so a
    /// crash between arming and firing keeps the cadence.
    ///
    /// Boxed: arming recurses through the spawned firing task
    /// (arm → fire → complete → arm), which an opaque future cannot express.
    pub fn arm(self: &Arc<Self>, job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        let me = Arc::clone(self);
        Box::pin(async move { me.arm_inner(job).await })
    }

    async fn arm_inner(self: Arc<Self>, mut job: Job) -> Result<()> {
        let now = Utc::now();
        let fire_at = next_fire_instant(&job, now)?;

        if job.repeat.is_interval() && job.next_run_at != Some(fire_at) {
            job.next_run_at = Some(fire_at);
            self.store.lock().await.upsert(&job)?;
        }

        let mut timers = self.timers.lock().await;
        if let Some(old) = timers.remove(&job.id) {
            old.abort();
        }
        self.states.lock().await.insert(job.id.clone(), JobState::Armed);
        tracing::info!(
            "📅 [{}] job {} armed ({}, fires {})",
            self.tenant,
            job.id,
            job.repeat,
            fire_at
        );

        let me = Arc::clone(&self);
        let job_id = job.id.clone();
        let handle = tokio::spawn(async move {
            let result = Arc::clone(&me).run_firing(&job_id, fire_at).await;
            if let Err(e) = result {
                // Fail-safe: drop the timer and do NOT re-arm; the next
                // reschedule_all recovers this job.
                tracing::error!(
                    "🛑 [{}] job {job_id}: firing failed: {e}; timer dropped until next reschedule",
                    me.tenant
                );
                me.timers.lock().await.remove(&job_id);
                me.states.lock().await.remove(&job_id);
            }
        });
        timers.insert(job.id, handle);
        Ok(())
    }

    /// The armed timer task: sleep, validate, queue, complete.
    async fn run_firing(self: Arc<Self>, job_id: &str, fire_at: DateTime<Utc>) -> Result<()> {
        let now = Utc::now();
        if fire_at > now {
            let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
        }

        self.advance(job_id, JobState::Firing).await;
        tracing::info!("🔔 [{}] job {job_id} firing", self.tenant);

        // An update may have landed after arming: trust only the
        // persisted record, not what the timer captured.
        let Some(job) = self.store.lock().await.get(job_id) else {
            self.forget(job_id).await;
            return Ok(());
        };
        if job.is_terminal(Utc::now()) {
            return self.retire(&job, "terminal condition at fire time").await;
        }

        // Window gating. Conditions are re-validated after every wait so a
        // job parked outside its window never executes stale state.
        let mut job = job;
        loop {
            let delay =
                window::delay_until_window(Utc::now().time(), job.window_start, job.window_end);
            if delay.is_zero() {
                break;
            }
            tracing::info!(
                "🪟 [{}] job {}: outside delivery window, deferring {}s",
                self.tenant,
                job.id,
                delay.as_secs()
            );
            tokio::time::sleep(delay).await;
            job = match self.store.lock().await.get(job_id) {
                Some(j) => j,
                None => {
                    self.forget(job_id).await;
                    return Ok(());
                }
            };
            if job.is_terminal(Utc::now()) {
                return self.retire(&job, "terminal condition after window wait").await;
            }
        }

        self.advance(job_id, JobState::Queued).await;
        let (done, completion) = oneshot::channel();
        self.queue
            .enqueue(DispatchTask {
                job_id: job.id.clone(),
                recipients: job.recipients.clone(),
                gap_secs: job.dispatch_gap_secs,
                jitter_min_secs: job.random_delay_min_secs,
                jitter_max_secs: job.random_delay_max_secs,
                done,
            })
            .await;

        let report = match completion.await {
            Ok(report) => report,
            Err(_) => {
                // The queue was cleared under us (tenant teardown).
                self.forget(job_id).await;
                return Ok(());
            }
        };
        tracing::info!(
            "📤 [{}] job {job_id}: firing complete, {} delivered, {} failed",
            self.tenant,
            report.delivered(),
            report.failed()
        );
        self.complete_firing(job_id, report).await
    }

    /// `Queued → Armed | Retired`: decrement counters, retire or recompute
    /// `next_run_at` and re-arm.
    async fn complete_firing(self: &Arc<Self>, job_id: &str, _report: DispatchReport) -> Result<()> {
        // Drop our own arena entry first so the re-arm below does not
        // abort the task it runs inside.
        self.timers.lock().await.remove(job_id);

        // A delete that raced this firing must not be resurrected.
        let Some(mut job) = self.store.lock().await.get(job_id) else {
            self.states.lock().await.remove(job_id);
            tracing::debug!("[{}] job {job_id} deleted mid-flight, no write-back", self.tenant);
            return Ok(());
        };

        // A firing consumed a run whatever the per-recipient outcomes.
        if let Some(runs) = job.remaining_runs.as_mut() {
            *runs = runs.saturating_sub(1);
        }

        let now = Utc::now();
        if job.repeat == RepeatPolicy::Once || job.is_terminal(now) {
            return self.retire(&job, "single firing resolved or terminal").await;
        }

        if job.repeat.is_interval() {
            if let NextFire::At(next) =
                compute_next_fire(job.anchor_at, job.repeat, job.interval_n, now)?
            {
                job.next_run_at = Some(next);
            }
        }
        self.store.lock().await.upsert(&job)?;
        self.advance(job_id, JobState::Armed).await;
        self.arm(job).await
    }

    /// External cancellation: abort the timer task if one is live.
    async fn cancel_timer(&self, job_id: &str) {
        if let Some(handle) = self.timers.lock().await.remove(job_id) {
            handle.abort();
        }
    }

    /// Terminal exit from inside the job's own timer task: the arena entry
    /// is dropped without an abort.
    async fn retire(&self, job: &Job, reason: &str) -> Result<()> {
        self.timers.lock().await.remove(&job.id);
        self.advance(&job.id, JobState::Retired).await;
        self.store.lock().await.remove(&job.id)?;
        tracing::info!("⏹ [{}] job {} retired: {reason}", self.tenant, job.id);
        Ok(())
    }

    /// Drop all trace of a job that vanished from the store mid-cycle.
    async fn forget(&self, job_id: &str) {
        self.timers.lock().await.remove(job_id);
        self.states.lock().await.remove(job_id);
        tracing::debug!("[{}] job {job_id} no longer persisted, timer dropped", self.tenant);
    }

    /// Move a job along the lifecycle table, warning on illegal jumps.
    async fn advance(&self, job_id: &str, next: JobState) {
        let mut states = self.states.lock().await;
        if let Some(current) = states.get(job_id).copied() {
            if !current.can_advance(next) {
                tracing::warn!(
                    "⚠️ [{}] job {job_id}: unexpected transition {current} → {next}",
                    self.tenant
                );
            }
        }
        if next == JobState::Retired {
            states.remove(job_id);
        } else {
            states.insert(job_id.to_string(), next);
        }
    }
}

/// Resolve the absolute instant this job fires next. A persisted future
/// `next_run_at` wins for interval policies (restart survival); otherwise
/// the recurrence calculator decides.
fn next_fire_instant(job: &Job, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if job.repeat.is_interval() {
        if let Some(persisted) = job.next_run_at {
            if persisted > now {
                return Ok(persisted);
            }
        }
    }
    match compute_next_fire(job.anchor_at, job.repeat, job.interval_n, now)? {
        NextFire::At(at) => Ok(at),
        NextFire::Calendar(spec) => spec.next_occurrence(now).ok_or_else(|| {
            SendloopError::scheduler(format!("job {}: no next calendar occurrence", job.id))
        }),
    }
}
