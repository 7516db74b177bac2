//! Capability traits the scheduler core is written against.
//!
//! The engine never talks to a concrete transport: it sees a
//! [`MessagingClient`], and `sendloop-channels` supplies the real adapters.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::Stream;

use crate::error::Result;
use crate::types::IncomingMessage;

/// Boxed stream of inbound messages, as produced by [`MessagingClient::listen`].
pub type IncomingStream = Box<dyn Stream<Item = IncomingMessage> + Send + Unpin>;

/// A tenant's connection to the remote messaging network.
///
/// Readiness may toggle multiple times per process lifetime (reconnects);
/// callers must tolerate `send_text` failing and the client being not-ready
/// at arbitrary times.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Adapter name, for logs.
    fn name(&self) -> &str;

    /// Establish the connection. Idempotent.
    async fn connect(&self) -> Result<()>;

    /// Whether the transport can accept sends right now.
    fn is_ready(&self) -> bool;

    /// Wait up to `timeout` for the transport to become ready.
    /// Returns `true` if ready within the bound.
    async fn wait_ready(&self, timeout: Duration) -> bool;

    /// Send literal text to one normalized address.
    async fn send_text(&self, address: &str, text: &str) -> Result<()>;

    /// Stream of inbound messages (replies) on this connection.
    async fn listen(&self) -> Result<IncomingStream>;

    /// Sign out of the remote network, keeping local state.
    async fn logout(&self) -> Result<()>;

    /// Tear the client down; no further calls are valid.
    async fn destroy(&self) -> Result<()>;
}
