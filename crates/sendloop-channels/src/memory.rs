//! In-memory messaging adapter — scripted outcomes for tests and dry runs.
//!
//! Records every accepted send, fails addresses on demand, toggles
//! readiness, and lets callers push inbound replies into the listen
//! stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_stream::wrappers::UnboundedReceiverStream;

use sendloop_core::error::{Result, SendloopError};
use sendloop_core::traits::{IncomingStream, MessagingClient};
use sendloop_core::types::IncomingMessage;

/// Scripted failure mode for one address.
enum FailureMode {
    /// Fail the next N sends, then succeed.
    Next(u32),
    /// Fail every send.
    Always,
}

pub struct MemoryClient {
    name: String,
    ready: AtomicBool,
    ready_changed: Notify,
    sent: Mutex<Vec<(String, String)>>,
    failures: Mutex<HashMap<String, FailureMode>>,
    incoming_tx: mpsc::UnboundedSender<IncomingMessage>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<IncomingMessage>>>,
}

impl MemoryClient {
    /// Create a client that starts not-ready.
    pub fn new(name: impl Into<String>) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            ready: AtomicBool::new(false),
            ready_changed: Notify::new(),
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
        }
    }

    /// Create a client that is ready immediately.
    pub fn ready(name: impl Into<String>) -> Self {
        let client = Self::new(name);
        client.set_ready(true);
        client
    }

    /// Flip readiness, waking any bounded waiters.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
        self.ready_changed.notify_waiters();
    }

    /// Fail the next `n` sends to `address`.
    pub fn fail_next(&self, address: &str, n: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(address.to_string(), FailureMode::Next(n));
    }

    /// Fail every send to `address`.
    pub fn fail_always(&self, address: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(address.to_string(), FailureMode::Always);
    }

    /// Push an inbound reply into the listen stream.
    pub fn push_incoming(&self, message: IncomingMessage) {
        self.incoming_tx.send(message).ok();
    }

    /// (address, text) pairs accepted so far, in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingClient for MemoryClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn wait_ready(&self, timeout: Duration) -> bool {
        if self.is_ready() {
            return true;
        }
        tokio::time::timeout(timeout, async {
            loop {
                self.ready_changed.notified().await;
                if self.is_ready() {
                    return;
                }
            }
        })
        .await
        .is_ok()
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<()> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(address) {
            Some(FailureMode::Always) => {
                return Err(SendloopError::transport(format!("scripted failure for {address}")));
            }
            Some(FailureMode::Next(n)) if *n > 0 => {
                *n -= 1;
                if *n == 0 {
                    failures.remove(address);
                }
                return Err(SendloopError::transport(format!("scripted failure for {address}")));
            }
            _ => {}
        }
        drop(failures);
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), text.to_string()));
        Ok(())
    }

    async fn listen(&self) -> Result<IncomingStream> {
        let rx = self
            .incoming_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SendloopError::transport("listen() already taken"))?;
        Ok(Box::new(UnboundedReceiverStream::new(rx)))
    }

    async fn logout(&self) -> Result<()> {
        self.set_ready(false);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.set_ready(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn records_sends_and_scripted_failures() {
        let client = MemoryClient::ready("mem");
        client.fail_next("a", 1);

        assert!(client.send_text("a", "x").await.is_err());
        assert!(client.send_text("a", "x").await.is_ok());
        assert!(client.send_text("b", "y").await.is_ok());
        assert_eq!(
            client.sent(),
            vec![("a".into(), "x".into()), ("b".into(), "y".into())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ready_observes_toggle() {
        let client = std::sync::Arc::new(MemoryClient::new("mem"));

        let waiter = {
            let client = std::sync::Arc::clone(&client);
            tokio::spawn(async move { client.wait_ready(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        client.set_ready(true);
        assert!(waiter.await.unwrap());

        client.set_ready(false);
        assert!(!client.wait_ready(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn listen_yields_pushed_messages() {
        let client = MemoryClient::ready("mem");
        let mut stream = client.listen().await.unwrap();
        client.push_incoming(IncomingMessage::new("addr-a", "hello"));

        let msg = stream.next().await.unwrap();
        assert_eq!(msg.from_address, "addr-a");
        assert_eq!(msg.body, "hello");
        assert!(!msg.is_self);
    }
}
