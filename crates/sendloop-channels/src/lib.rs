//! # Sendloop Channels
//!
//! Transport adapters implementing the [`sendloop_core::MessagingClient`]
//! capability: the HTTP gateway bridge the daemon runs against, and an
//! in-memory adapter for tests and dry runs.

pub mod gateway;
pub mod memory;

pub use gateway::GatewayClient;
pub use memory::MemoryClient;
