//! # Sendloop Scheduler
//!
//! The scheduling and dispatch engine: per-job timers, recurrence
//! computation with crash-surviving `next_run_at`, delivery-window gating,
//! and the per-tenant serialized dispatch queue with throttling and retry.
//!
//! ## Architecture
//! ```text
//! JobScheduler (one per tenant)
//!   ├── timer arena: job id → abort handle (one live timer per id)
//!   ├── on fire → reload job, re-check terminal conditions + window
//!   ├── enqueue → DispatchQueue (single worker, FIFO)
//!   │               └── per recipient: jitter → readiness wait →
//!   │                   send (retry + backoff) → gap
//!   └── on completion → decrement runs, retire or persist next_run_at
//!                       and re-arm
//! ```
//!
//! Timers run one tokio task per armed job; the queue is the only
//! serialization point, so concurrent firings within a tenant flatten into
//! one ordered send stream. Tenants never share any of this state.

pub mod engine;
pub mod job;
pub mod queue;
pub mod recurrence;
pub mod store;
pub mod window;

pub use engine::JobScheduler;
pub use job::{DispatchReport, Job, JobState, RepeatPolicy};
pub use queue::{DispatchQueue, DispatchTask};
pub use recurrence::{compute_next_fire, CalendarSpec, NextFire};
pub use store::JobStore;
