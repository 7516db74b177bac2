//! Sendloop error type.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SendloopError>;

/// All errors surfaced by Sendloop crates.
#[derive(Debug, Error)]
pub enum SendloopError {
    /// Configuration loading/parsing problems.
    #[error("config error: {0}")]
    Config(String),

    /// Messaging transport failures (send, connect, gateway).
    #[error("transport error: {0}")]
    Transport(String),

    /// Durable job-store failures.
    #[error("store error: {0}")]
    Store(String),

    /// Scheduler-internal faults (arming, firing, state transitions).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Rejected job fields (empty recipients, bad recurrence params).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown tenant id.
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SendloopError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn scheduler(msg: impl Into<String>) -> Self {
        Self::Scheduler(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
