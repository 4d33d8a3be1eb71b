//! Health checks used by the monitor.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::MonitorConfig;
use crate::runtime::{ExecOptions, Runtime};

/// Secondary checks beyond "is the container running".
#[async_trait]
pub(crate) trait HealthChecker: Send + Sync {
    /// Whether the sandbox answers on its address.
    async fn reachable(&self, container: &str, address: Ipv4Addr) -> bool;

    /// Whether an agent session is active inside the container.
    async fn session_active(&self, container: &str) -> bool;
}

/// Probes `http://<address>:<port><path>` and runs the configured session
/// probe through the runtime.
///
/// Any HTTP response counts as reachable; only connection failures and
/// timeouts do not. Port 0 disables the probe.
pub(crate) struct HttpHealthChecker {
    client: reqwest::Client,
    port: u16,
    path: String,
    probe_timeout: Duration,
    session_probe: Option<Vec<String>>,
    runtime: Arc<dyn Runtime>,
}

impl HttpHealthChecker {
    pub fn new(config: &MonitorConfig, runtime: Arc<dyn Runtime>) -> anyhow::Result<Self> {
        let probe_timeout = Duration::from_millis(config.probe_timeout_ms);
        let client = reqwest::Client::builder().timeout(probe_timeout).build()?;
        let session_probe = config
            .session_probe
            .as_deref()
            .map(shell_words::split)
            .transpose()
            .map_err(|e| anyhow::anyhow!("Invalid monitor.session_probe: {e}"))?
            .filter(|argv| !argv.is_empty());
        Ok(Self {
            client,
            port: config.probe_port,
            path: config.probe_path.clone(),
            probe_timeout,
            session_probe,
            runtime,
        })
    }

    fn url(&self, address: Ipv4Addr) -> String {
        probe_url(address, self.port, &self.path)
    }
}

fn probe_url(address: Ipv4Addr, port: u16, path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    format!("http://{address}:{port}{path}")
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn reachable(&self, container: &str, address: Ipv4Addr) -> bool {
        if self.port == 0 {
            return true;
        }
        let url = self.url(address);
        match self.client.get(&url).send().await {
            Ok(resp) => {
                tracing::trace!(container, %url, status = %resp.status(), "probe answered");
                true
            }
            Err(e) => {
                tracing::debug!(container, %url, error = %e, "probe failed");
                false
            }
        }
    }

    async fn session_active(&self, container: &str) -> bool {
        let Some(ref argv) = self.session_probe else {
            return false;
        };
        let opts = ExecOptions::default();
        let exec = self.runtime.exec(container, argv, &opts);
        match timeout(self.probe_timeout, exec).await {
            Ok(Ok(output)) => output.success(),
            Ok(Err(e)) => {
                tracing::debug!(container, error = %e, "session probe failed");
                false
            }
            Err(_) => false,
        }
    }
}
