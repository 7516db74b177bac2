//! Tenant lifecycle — one isolated scheduling universe per tenant.
//!
//! A tenant bundles its own transport client, job store, scheduler, and
//! dispatch queue. Nothing is shared across tenants except the factory
//! that builds transport clients, so one tenant's slow sends or bad jobs
//! cannot leak into another's.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use sendloop_core::config::SchedulerConfig;
use sendloop_core::error::{Result, SendloopError};
use sendloop_core::traits::MessagingClient;
use sendloop_scheduler::{DispatchQueue, JobScheduler, JobStore};

/// Builds the transport client for a tenant id.
pub type ClientFactory = Arc<dyn Fn(&str) -> Arc<dyn MessagingClient> + Send + Sync>;

/// A running tenant: transport + scheduler + queue + background tasks.
pub struct Tenant {
    pub id: String,
    pub client: Arc<dyn MessagingClient>,
    pub scheduler: Arc<JobScheduler>,
    pub queue: Arc<DispatchQueue>,
    /// Ready-watch and listen loops; aborted on destroy/shutdown.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Tenant {
    async fn stop_tasks(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// Snapshot of one tenant for status reporting.
#[derive(Debug, Clone)]
pub struct TenantStatus {
    pub id: String,
    pub ready: bool,
    pub job_count: usize,
    pub pending_dispatches: usize,
}

/// Owns all running tenants. Ensure is idempotent; destroy is total
/// (timers, queue, persisted jobs, transport session all go).
pub struct TenantManager {
    data_dir: PathBuf,
    tuning: SchedulerConfig,
    factory: ClientFactory,
    tenants: Mutex<HashMap<String, Arc<Tenant>>>,
}

impl TenantManager {
    pub fn new(data_dir: impl Into<PathBuf>, tuning: SchedulerConfig, factory: ClientFactory) -> Self {
        Self {
            data_dir: data_dir.into(),
            tuning,
            factory,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Bring a tenant up, or return the already-running one.
    pub async fn ensure(&self, id: &str) -> Result<Arc<Tenant>> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(SendloopError::validation(format!("invalid tenant id {id:?}")));
        }

        let mut tenants = self.tenants.lock().await;
        if let Some(existing) = tenants.get(id) {
            return Ok(Arc::clone(existing));
        }

        tracing::info!("🚀 starting tenant {id}");
        let client = (self.factory)(id);
        let queue = DispatchQueue::new(id, Arc::clone(&client), self.tuning.clone());
        let store = JobStore::new(&self.data_dir.join(id));
        let scheduler = JobScheduler::new(id, store, Arc::clone(&queue));

        client.connect().await?;

        let tenant = Arc::new(Tenant {
            id: id.to_string(),
            client: Arc::clone(&client),
            scheduler: Arc::clone(&scheduler),
            queue,
            tasks: Mutex::new(Vec::new()),
        });

        let ready_watch = tokio::spawn(Self::ready_watch(
            id.to_string(),
            Arc::clone(&client),
            Arc::clone(&scheduler),
        ));
        let listener = tokio::spawn(Self::listen_loop(
            id.to_string(),
            Arc::clone(&client),
            Arc::clone(&scheduler),
        ));
        tenant.tasks.lock().await.extend([ready_watch, listener]);

        tenants.insert(id.to_string(), Arc::clone(&tenant));
        Ok(tenant)
    }

    /// Poll transport readiness; every not-ready → ready edge re-arms the
    /// persisted jobs. This is also the recovery path for timers dropped
    /// by a failed firing.
    ///
    /// Goes through `wait_ready`, not `is_ready`: adapters whose flag is a
    /// cached snapshot (the gateway bridge) only refresh it when asked, so
    /// a passive flag read would never see the transport come up.
    async fn ready_watch(
        id: String,
        client: Arc<dyn MessagingClient>,
        scheduler: Arc<JobScheduler>,
    ) {
        let poll = Duration::from_secs(2);
        let mut was_ready = false;
        loop {
            let ready = client.wait_ready(poll).await;
            if ready && !was_ready {
                tracing::info!("🔔 [{id}] transport ready, rescheduling persisted jobs");
                scheduler.reschedule_all().await;
            } else if !ready && was_ready {
                tracing::warn!("⚠️ [{id}] transport lost readiness");
            }
            was_ready = ready;
            tokio::time::sleep(poll).await;
        }
    }

    /// Route inbound replies to stop-keyword cancellation. Messages the
    /// tenant sent itself are ignored.
    async fn listen_loop(
        id: String,
        client: Arc<dyn MessagingClient>,
        scheduler: Arc<JobScheduler>,
    ) {
        let mut stream = match client.listen().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("🛑 [{id}] cannot listen for replies: {e}");
                return;
            }
        };
        while let Some(message) = stream.next().await {
            if message.is_self {
                continue;
            }
            tracing::debug!("📥 [{id}] reply from {}", message.from_address);
            scheduler.cancel_for_reply(&message.from_address, &message.body).await;
        }
        tracing::info!("📪 [{id}] incoming stream closed");
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Tenant>> {
        self.tenants.lock().await.get(id).cloned()
    }

    pub async fn tenant_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tenants.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn status(&self) -> Vec<TenantStatus> {
        let tenants: Vec<Arc<Tenant>> = self.tenants.lock().await.values().cloned().collect();
        let mut out = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            out.push(TenantStatus {
                id: tenant.id.clone(),
                ready: tenant.client.is_ready(),
                job_count: tenant.scheduler.job_count().await,
                pending_dispatches: tenant.queue.pending().await,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Tear a tenant down completely: timers, queued dispatches, the
    /// persisted job collection, and the transport session.
    pub async fn destroy(&self, id: &str) -> Result<bool> {
        let Some(tenant) = self.tenants.lock().await.remove(id) else {
            return Ok(false);
        };
        tenant.stop_tasks().await;
        tenant.scheduler.shutdown().await;
        tenant.queue.clear().await;
        if let Err(e) = tenant.client.logout().await {
            tracing::warn!("⚠️ [{id}] logout failed during destroy: {e}");
        }
        if let Err(e) = tenant.client.destroy().await {
            tracing::warn!("⚠️ [{id}] transport teardown failed: {e}");
        }
        tenant.scheduler.purge_store().await?;
        tracing::info!("🗑 tenant {id} destroyed");
        Ok(true)
    }

    /// Stop all tenants without purging anything. Jobs stay persisted and
    /// come back on the next start.
    pub async fn shutdown_all(&self) {
        let tenants: Vec<Arc<Tenant>> =
            self.tenants.lock().await.drain().map(|(_, t)| t).collect();
        for tenant in tenants {
            tenant.stop_tasks().await;
            tenant.scheduler.shutdown().await;
            tenant.queue.clear().await;
            tracing::info!("⏸ tenant {} stopped", tenant.id);
        }
    }
}
