//! HTTP gateway bridge — the production transport adapter.
//!
//! The daemon never speaks the messaging network's own protocol; an
//! external gateway does the connecting/authenticating, and this adapter
//! bridges to it over plain HTTP:
//!
//! - `POST {base}/send`      — deliver text to one address
//! - `GET  {base}/status`    — readiness probe (`{"ready": bool}`)
//! - `GET  {base}/incoming`  — poll for inbound replies since a cursor
//! - `POST {base}/logout`    — sign the tenant out
//!
//! Readiness can toggle many times per process lifetime (the gateway
//! reconnects on its own); callers see that through `is_ready` /
//! `wait_ready`, never as errors.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use sendloop_core::config::GatewayConfig;
use sendloop_core::error::{Result, SendloopError};
use sendloop_core::traits::{IncomingStream, MessagingClient};
use sendloop_core::types::IncomingMessage;

/// One inbound message as the gateway reports it.
#[derive(Debug, Deserialize)]
struct GatewayIncoming {
    id: i64,
    from: String,
    body: String,
    #[serde(default)]
    is_self: bool,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    ready: bool,
}

pub struct GatewayClient {
    tenant: String,
    config: GatewayConfig,
    http: reqwest::Client,
    ready: AtomicBool,
    /// Cursor of the last inbound message seen by the poll loop.
    last_seen: AtomicI64,
}

impl GatewayClient {
    pub fn new(tenant: impl Into<String>, config: GatewayConfig) -> Self {
        Self {
            tenant: tenant.into(),
            config,
            http: reqwest::Client::new(),
            ready: AtomicBool::new(false),
            last_seen: AtomicI64::new(0),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{path}", self.config.base_url.trim_end_matches('/'), self.tenant)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.auth_token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.config.auth_token)
        }
    }

    /// Probe the gateway and cache the readiness flag.
    async fn refresh_ready(&self) -> bool {
        let result = self
            .auth(self.http.get(self.url("status")))
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        let ready = match result {
            Ok(resp) if resp.status().is_success() => resp
                .json::<StatusResponse>()
                .await
                .map(|s| s.ready)
                .unwrap_or(false),
            Ok(resp) => {
                tracing::debug!("[{}] gateway status probe: HTTP {}", self.tenant, resp.status());
                false
            }
            Err(e) => {
                tracing::debug!("[{}] gateway status probe failed: {e}", self.tenant);
                false
            }
        };
        self.ready.store(ready, Ordering::SeqCst);
        ready
    }

    async fn poll_incoming(&self) -> Result<Vec<IncomingMessage>> {
        let since = self.last_seen.load(Ordering::SeqCst);
        let resp = self
            .auth(self.http.get(self.url("incoming")))
            .query(&[("since", since)])
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| SendloopError::transport(format!("incoming poll failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(SendloopError::transport(format!(
                "incoming poll: HTTP {}",
                resp.status()
            )));
        }
        let batch: Vec<GatewayIncoming> = resp
            .json()
            .await
            .map_err(|e| SendloopError::transport(format!("invalid incoming payload: {e}")))?;
        let mut messages = Vec::with_capacity(batch.len());
        for item in batch {
            self.last_seen.fetch_max(item.id, Ordering::SeqCst);
            messages.push(IncomingMessage {
                from_address: item.from,
                body: item.body,
                is_self: item.is_self,
                timestamp: item.timestamp,
            });
        }
        Ok(messages)
    }
}

#[async_trait]
impl MessagingClient for GatewayClient {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn connect(&self) -> Result<()> {
        let ready = self.refresh_ready().await;
        tracing::info!(
            "🔌 [{}] gateway connect: {} ({})",
            self.tenant,
            self.config.base_url,
            if ready { "ready" } else { "not ready" }
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.refresh_ready().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs.max(1))).await;
        }
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<()> {
        let resp = self
            .auth(self.http.post(self.url("send")))
            .json(&serde_json::json!({ "to": address, "text": text }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| {
                self.ready.store(false, Ordering::SeqCst);
                SendloopError::transport(format!("send failed: {e}"))
            })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SendloopError::transport(format!("gateway error {status}: {body}")));
        }
        Ok(())
    }

    async fn listen(&self) -> Result<IncomingStream> {
        // The adapter turns the poll endpoint into a stream; consumers
        // just see messages arriving.
        let tenant = self.tenant.clone();
        let client = GatewayClient::new(tenant.clone(), self.config.clone());
        client
            .last_seen
            .store(self.last_seen.load(Ordering::SeqCst), Ordering::SeqCst);
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));

        let stream = async_stream::stream! {
            loop {
                match client.poll_incoming().await {
                    Ok(batch) => {
                        for message in batch {
                            yield message;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("[{tenant}] incoming poll error: {e}");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        };
        Ok(Box::new(Box::pin(stream)))
    }

    async fn logout(&self) -> Result<()> {
        self.auth(self.http.post(self.url("logout")))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| SendloopError::transport(format!("logout failed: {e}")))?;
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_tenant_scoped() {
        let mut config = GatewayConfig::default();
        config.base_url = "http://gw:9000/".into();
        let client = GatewayClient::new("acme", config);
        assert_eq!(client.url("send"), "http://gw:9000/acme/send");
        assert_eq!(client.url("status"), "http://gw:9000/acme/status");
    }

    #[test]
    fn incoming_payload_shape() {
        let raw = r#"[{"id": 7, "from": "addr-a", "body": "stop please"}]"#;
        let batch: Vec<GatewayIncoming> = serde_json::from_str(raw).unwrap();
        assert_eq!(batch[0].id, 7);
        assert_eq!(batch[0].from, "addr-a");
        assert!(!batch[0].is_self);
    }
}
