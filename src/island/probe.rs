//! Reachability probes - answer "is the coordinating tier reachable right now?"

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::{ProbeConfig, ProbeKind};
use crate::error::{IslandError, Result};

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Any `Fn() -> bool` is a probe
#[async_trait]
impl<F> ReachabilityProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    async fn is_reachable(&self) -> bool {
        self()
    }
}

/// Shared on/off switch, for tests and simulated faults
#[derive(Debug, Clone)]
pub struct StaticProbe {
    reachable: Arc<AtomicBool>,
}

impl StaticProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: Arc::new(AtomicBool::new(reachable)),
        }
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Reachable when `host:port` accepts a TCP connection within the timeout
pub struct TcpProbe {
    target: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(target = %self.target, error = %e, "TCP probe failed");
                false
            }
            Err(_) => {
                debug!(target = %self.target, "TCP probe timed out");
                false
            }
        }
    }
}

/// Reachable when a GET on the health URL returns 2xx within the timeout
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IslandError::Config(format!("building HTTP probe client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(url = %self.url, status = %response.status(), "Health check unhealthy");
                false
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "Health check failed");
                false
            }
        }
    }
}

/// Build the probe described by `[probe]`
pub fn build_probe(config: &ProbeConfig) -> Result<Arc<dyn ReachabilityProbe>> {
    let timeout = Duration::from_millis(config.timeout_ms);
    let target = || {
        config
            .target
            .clone()
            .ok_or_else(|| IslandError::Config(format!("probe kind {:?} requires a target", config.kind)))
    };

    Ok(match config.kind {
        ProbeKind::Http => Arc::new(HttpProbe::new(target()?, timeout)?),
        ProbeKind::Tcp => Arc::new(TcpProbe::new(target()?, timeout)),
        ProbeKind::Static => Arc::new(StaticProbe::new(true)),
    })
}
