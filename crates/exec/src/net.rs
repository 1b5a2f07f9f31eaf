//! Network reachability gate.

use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use updated_config::NetworkConfig;

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Sends a single ICMP echo with `ping -W <timeout> -c 1 <target>`.
#[derive(Debug, Clone)]
pub struct PingProbe {
    target: String,
    timeout_secs: u64,
}

impl PingProbe {
    pub fn new(target: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            target: target.into(),
            timeout_secs,
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(config.test_ip.clone(), config.ping_timeout_secs)
    }
}

#[async_trait]
impl ConnectivityProbe for PingProbe {
    async fn is_online(&self) -> bool {
        let status = tokio::process::Command::new("ping")
            .args(["-W", &self.timeout_secs.to_string(), "-c", "1", &self.target])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) => status.success(),
            Err(err) => {
                debug!(?err, target = %self.target, "ping could not be started");
                false
            }
        }
    }
}
