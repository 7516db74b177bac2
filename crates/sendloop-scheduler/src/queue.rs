//! Dispatch queue — the per-tenant serialization point.
//!
//! Exactly one task executes at a time (FIFO): a slow send to one
//! recipient never interleaves with another concurrently-fired job's
//! sends within the same tenant. A dedicated worker drains the queue
//! until empty, then goes idle; `enqueue` restarts it when needed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{oneshot, Mutex};

use sendloop_core::config::SchedulerConfig;
use sendloop_core::traits::MessagingClient;
use sendloop_core::types::{Recipient, SendOutcome};

use crate::job::DispatchReport;

/// One in-memory unit of work: "send this job's recipient list now".
/// Owned exclusively by the queue that dequeues it; never persisted,
/// never shared across tenants.
pub struct DispatchTask {
    pub job_id: String,
    pub recipients: Vec<Recipient>,
    /// Per-job gap override; `None` uses the configured default.
    pub gap_secs: Option<u64>,
    pub jitter_min_secs: u64,
    pub jitter_max_secs: u64,
    /// Completion channel back to the scheduler's firing.
    pub done: oneshot::Sender<DispatchReport>,
}

struct QueueState {
    queue: VecDeque<DispatchTask>,
    worker_active: bool,
    total_processed: u64,
}

/// Per-tenant FIFO dispatch queue with a single drain worker.
pub struct DispatchQueue {
    tenant: String,
    client: Arc<dyn MessagingClient>,
    tuning: SchedulerConfig,
    state: Mutex<QueueState>,
}

impl DispatchQueue {
    pub fn new(
        tenant: impl Into<String>,
        client: Arc<dyn MessagingClient>,
        tuning: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            tenant: tenant.into(),
            client,
            tuning,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                worker_active: false,
                total_processed: 0,
            }),
        })
    }

    /// Push a task; spawn the drain worker if it is idle.
    pub async fn enqueue(self: &Arc<Self>, task: DispatchTask) {
        let mut state = self.state.lock().await;
        tracing::debug!(
            "📥 [{}] enqueue job {} (queued: {}, worker: {})",
            self.tenant,
            task.job_id,
            state.queue.len(),
            state.worker_active
        );
        state.queue.push_back(task);
        if !state.worker_active {
            state.worker_active = true;
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.drain().await });
        }
    }

    /// Tasks waiting plus the one in flight.
    pub async fn pending(&self) -> usize {
        let state = self.state.lock().await;
        state.queue.len() + state.worker_active as usize
    }

    /// Completed task count.
    pub async fn total_processed(&self) -> u64 {
        self.state.lock().await.total_processed
    }

    /// Discard all waiting tasks (tenant destroy). The in-flight task, if
    /// any, is allowed to finish; dropped completion channels tell their
    /// firings the queue gave up on them.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        let dropped = state.queue.len();
        state.queue.clear();
        if dropped > 0 {
            tracing::info!("🗑 [{}] discarded {dropped} queued dispatch tasks", self.tenant);
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let task = {
                let mut state = self.state.lock().await;
                match state.queue.pop_front() {
                    Some(task) => task,
                    None => {
                        state.worker_active = false;
                        return;
                    }
                }
            };
            let DispatchTask {
                job_id,
                recipients,
                gap_secs,
                jitter_min_secs,
                jitter_max_secs,
                done,
            } = task;

            let report = self
                .send_recipients(&job_id, &recipients, gap_secs, jitter_min_secs, jitter_max_secs)
                .await;
            self.state.lock().await.total_processed += 1;

            if done.send(report).is_err() {
                // The firing was aborted (job deleted mid-flight); nothing
                // to write back.
                tracing::debug!("[{}] firing for job {job_id} went away", self.tenant);
            }
        }
    }

    /// Send to each recipient in order. Failures are recorded, never
    /// propagated: one bad recipient cannot abort the rest of the firing.
    async fn send_recipients(
        &self,
        job_id: &str,
        recipients: &[Recipient],
        gap_secs: Option<u64>,
        jitter_min_secs: u64,
        jitter_max_secs: u64,
    ) -> DispatchReport {
        let gap_secs = gap_secs.unwrap_or(self.tuning.default_dispatch_gap_secs);
        let mut outcomes = Vec::with_capacity(recipients.len());
        for (i, recipient) in recipients.iter().enumerate() {
            if jitter_max_secs > 0 {
                let jitter = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(jitter_min_secs..=jitter_max_secs)
                };
                if jitter > 0 {
                    tracing::debug!(
                        "[{}] job {job_id}: jitter {jitter}s before {}",
                        self.tenant,
                        recipient.address
                    );
                    tokio::time::sleep(Duration::from_secs(jitter)).await;
                }
            }

            let outcome = self.send_one(job_id, &recipient.address, &recipient.message).await;
            match &outcome {
                SendOutcome::Delivered => {
                    tracing::info!("✅ [{}] job {job_id}: sent to {}", self.tenant, recipient.address)
                }
                SendOutcome::Failed(reason) => tracing::warn!(
                    "⚠️ [{}] job {job_id}: giving up on {}: {reason}",
                    self.tenant,
                    recipient.address
                ),
            }
            outcomes.push((recipient.address.clone(), outcome));

            if i + 1 < recipients.len() && gap_secs > 0 {
                tokio::time::sleep(Duration::from_secs(gap_secs)).await;
            }
        }
        DispatchReport {
            job_id: job_id.to_string(),
            outcomes,
        }
    }

    /// One recipient: bounded readiness wait, then up to N attempts with
    /// linear backoff (base × attempt seconds) between them.
    async fn send_one(&self, job_id: &str, address: &str, text: &str) -> SendOutcome {
        let attempts = self.tuning.send_attempts.max(1);
        let mut last_err = String::new();

        for attempt in 1..=attempts {
            if !self.client.is_ready() {
                tracing::info!(
                    "⏳ [{}] job {job_id}: transport not ready, waiting up to {}s",
                    self.tenant,
                    self.tuning.ready_wait_secs
                );
                let became_ready = self
                    .client
                    .wait_ready(Duration::from_secs(self.tuning.ready_wait_secs))
                    .await;
                if !became_ready {
                    return SendOutcome::Failed("transport not ready within bound".into());
                }
            }

            match self.client.send_text(address, text).await {
                Ok(()) => return SendOutcome::Delivered,
                Err(e) => {
                    last_err = e.to_string();
                    tracing::warn!(
                        "⚠️ [{}] job {job_id}: attempt {attempt}/{attempts} to {address} failed: {last_err}",
                        self.tenant
                    );
                    let backoff = self.tuning.backoff_base_secs * attempt as u64;
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                }
            }
        }
        SendOutcome::Failed(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sendloop_channels::memory::MemoryClient;
    use tokio::time::Instant;

    fn task(
        job_id: &str,
        recipients: Vec<Recipient>,
        gap_secs: Option<u64>,
    ) -> (DispatchTask, oneshot::Receiver<DispatchReport>) {
        let (tx, rx) = oneshot::channel();
        (
            DispatchTask {
                job_id: job_id.into(),
                recipients,
                gap_secs,
                jitter_min_secs: 0,
                jitter_max_secs: 0,
                done: tx,
            },
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_in_order_with_gap() {
        let client = Arc::new(MemoryClient::ready("test"));
        let queue = DispatchQueue::new("t1", client.clone(), SchedulerConfig::default());

        let (t, rx) = task(
            "j1",
            vec![Recipient::new("a", "one"), Recipient::new("b", "two")],
            Some(2),
        );
        let started = Instant::now();
        queue.enqueue(t).await;

        let report = rx.await.unwrap();
        assert_eq!(report.delivered(), 2);
        assert_eq!(client.sent(), vec![("a".into(), "one".into()), ("b".into(), "two".into())]);
        // one 2s gap between the two recipients
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_does_not_skip_later_recipients() {
        let client = Arc::new(MemoryClient::ready("test"));
        client.fail_always("bad");
        let queue = DispatchQueue::new("t1", client.clone(), SchedulerConfig::default());

        let (t, rx) = task(
            "j1",
            vec![Recipient::new("bad", "x"), Recipient::new("good", "y")],
            Some(2),
        );
        let started = Instant::now();
        queue.enqueue(t).await;

        let report = rx.await.unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.delivered(), 1);
        assert!(matches!(report.outcomes[0].1, SendOutcome::Failed(_)));
        assert_eq!(client.sent(), vec![("good".into(), "y".into())]);
        // backoff 3 + 6 + 9 after the three failed attempts, then the 2s gap
        assert!(started.elapsed() >= Duration::from_secs(3 + 6 + 9 + 2));
    }

    #[tokio::test(start_paused = true)]
    async fn unset_gap_inherits_configured_default() {
        let client = Arc::new(MemoryClient::ready("test"));
        let mut tuning = SchedulerConfig::default();
        tuning.default_dispatch_gap_secs = 7;
        let queue = DispatchQueue::new("t1", client.clone(), tuning);

        let (t, rx) = task(
            "j1",
            vec![Recipient::new("a", "one"), Recipient::new("b", "two")],
            None,
        );
        let started = Instant::now();
        queue.enqueue(t).await;

        let report = rx.await.unwrap();
        assert_eq!(report.delivered(), 2);
        // the configured 7s default, not the serde-level 2s
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_across_tasks() {
        let client = Arc::new(MemoryClient::ready("test"));
        let queue = DispatchQueue::new("t1", client.clone(), SchedulerConfig::default());

        let (t1, rx1) = task("j1", vec![Recipient::new("a", "first")], Some(0));
        let (t2, rx2) = task("j2", vec![Recipient::new("b", "second")], Some(0));
        queue.enqueue(t1).await;
        queue.enqueue(t2).await;

        rx1.await.unwrap();
        rx2.await.unwrap();
        assert_eq!(
            client.sent(),
            vec![("a".into(), "first".into()), ("b".into(), "second".into())]
        );
        assert_eq!(queue.total_processed().await, 2);
        assert_eq!(queue.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_times_out_without_burning_retries() {
        let client = Arc::new(MemoryClient::new("test"));
        // never becomes ready
        let queue = DispatchQueue::new("t1", client.clone(), SchedulerConfig::default());

        let (t, rx) = task("j1", vec![Recipient::new("a", "x")], Some(0));
        queue.enqueue(t).await;

        let report = rx.await.unwrap();
        assert_eq!(report.failed(), 1);
        assert!(client.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_discards_waiting_tasks() {
        let client = Arc::new(MemoryClient::ready("test"));
        client.fail_always("slow");
        let queue = DispatchQueue::new("t1", client.clone(), SchedulerConfig::default());

        // first task occupies the worker for a while (retries + backoff)
        let (t1, _rx1) = task("j1", vec![Recipient::new("slow", "x")], Some(0));
        let (t2, rx2) = task("j2", vec![Recipient::new("b", "y")], Some(0));
        queue.enqueue(t1).await;
        queue.enqueue(t2).await;
        queue.clear().await;

        // the waiting task's completion channel is dropped with it
        assert!(rx2.await.is_err());
    }
}
