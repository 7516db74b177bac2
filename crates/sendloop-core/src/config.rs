//! Sendloop configuration system.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SendloopError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendloopConfig {
    /// Where per-tenant job documents live.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Tenant ids to bring up at startup.
    #[serde(default)]
    pub tenants: Vec<String>,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// External transport gateway (the messaging bridge the daemon sends through).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
    #[serde(default)]
    pub auth_token: String,
    /// How often the incoming-message poll loop asks for new replies.
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,
}

/// Scheduler tunables (per-job fields still override the gap).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between consecutive recipients within one firing.
    #[serde(default = "default_dispatch_gap")]
    pub default_dispatch_gap_secs: u64,
    /// Send attempts per recipient before giving up.
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,
    /// Backoff base: wait `base × attempt` seconds between attempts.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    /// Bounded wait for transport readiness before a send attempt.
    #[serde(default = "default_ready_wait")]
    pub ready_wait_secs: u64,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sendloop")
}
fn default_gateway_url() -> String {
    "http://127.0.0.1:8620".into()
}
fn default_poll_secs() -> u64 {
    2
}
fn default_dispatch_gap() -> u64 {
    2
}
fn default_send_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    3
}
fn default_ready_wait() -> u64 {
    90
}

impl Default for SendloopConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            tenants: Vec::new(),
            gateway: GatewayConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            auth_token: String::new(),
            poll_interval_secs: default_poll_secs(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_dispatch_gap_secs: default_dispatch_gap(),
            send_attempts: default_send_attempts(),
            backoff_base_secs: default_backoff_base(),
            ready_wait_secs: default_ready_wait(),
        }
    }
}

impl SendloopConfig {
    /// Load from a TOML file. Missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SendloopError::config(format!("{}: {e}", path.display())))
    }

    /// Default config path (~/.sendloop/config.toml).
    pub fn default_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SendloopConfig::default();
        assert_eq!(cfg.scheduler.default_dispatch_gap_secs, 2);
        assert_eq!(cfg.scheduler.send_attempts, 3);
        assert_eq!(cfg.scheduler.ready_wait_secs, 90);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: SendloopConfig = toml::from_str(
            r#"
            tenants = ["acme"]

            [gateway]
            base_url = "http://gw:9000"

            [scheduler]
            send_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tenants, vec!["acme"]);
        assert_eq!(cfg.gateway.base_url, "http://gw:9000");
        assert_eq!(cfg.scheduler.send_attempts, 5);
        // untouched field keeps its default
        assert_eq!(cfg.scheduler.backoff_base_secs, 3);
    }
}
