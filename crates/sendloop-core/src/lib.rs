//! # Sendloop Core
//!
//! Shared foundation for the Sendloop workspace: the error type, the daemon
//! configuration, domain types, and the capability traits the scheduler is
//! written against (`MessagingClient`).
//!
//! Nothing in here schedules or sends anything by itself — transports live
//! in `sendloop-channels`, the engine in `sendloop-scheduler`.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::SendloopConfig;
pub use error::{Result, SendloopError};
pub use traits::MessagingClient;
pub use types::{IncomingMessage, Recipient, SendOutcome};
