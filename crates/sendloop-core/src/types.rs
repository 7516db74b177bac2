//! Domain types shared across Sendloop crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One (address, message) pair inside a job's recipient list.
///
/// The address is a normalized transport identifier — an individual or a
/// group — and the message is the literal text delivered to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    pub message: String,
}

impl Recipient {
    pub fn new(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            message: message.into(),
        }
    }
}

/// An inbound message observed by a tenant's messaging client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Normalized sender address.
    pub from_address: String,
    /// Message body.
    pub body: String,
    /// True when the message was sent by the tenant's own identity.
    pub is_self: bool,
    pub timestamp: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(from_address: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from_address: from_address.into(),
            body: body.into(),
            is_self: false,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of one send attempt chain for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendOutcome {
    /// The transport accepted the message.
    Delivered,
    /// All attempts exhausted; the last error is kept.
    Failed(String),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}
