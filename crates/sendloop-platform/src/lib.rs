//! Sendloop platform layer — tenant lifecycle.
//!
//! ```text
//!    TenantManager
//!         │ ensure / get / destroy
//!         ▼
//!      Tenant ──── MessagingClient (transport)
//!         │  ├──── JobScheduler    (timers + state machine)
//!         │  └──── DispatchQueue   (serialized sends)
//!         │
//!         ├── ready-watch task  → reschedule_all on reconnect
//!         └── listen task       → stop-keyword cancellation
//! ```

pub mod tenant;

pub use tenant::{ClientFactory, Tenant, TenantManager, TenantStatus};
