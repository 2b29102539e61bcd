use crate::SearchError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, error, info};
use url::Url;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessConfig {
    /// Per-attempt connect timeout.
    pub timeout: Duration,
    pub retries: u32,
    /// Pause after a failed attempt.
    pub delay: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            retries: 120,
            delay: Duration::from_secs(5),
        }
    }
}

/// Blocks until a TCP connection to `host:port` succeeds, or fails with
/// `NotReady` once `config.retries` attempts have been used up.
pub async fn wait_for_service(
    host: &str,
    port: u16,
    config: &ReadinessConfig,
) -> Result<(), SearchError> {
    for attempt in 1..=config.retries {
        match tokio::time::timeout(config.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => {
                info!(host, port, attempt, "service reachable");
                return Ok(());
            }
            Ok(Err(err)) => debug!(host, port, attempt, error = %err, "connect failed"),
            Err(_) => debug!(host, port, attempt, "connect timed out"),
        }

        if attempt < config.retries {
            tokio::time::sleep(config.delay).await;
        }
    }

    error!(host, port, retries = config.retries, "service never became reachable");
    Err(SearchError::NotReady(format!(
        "{host}:{port} unreachable after {} attempts",
        config.retries
    )))
}

/// [`wait_for_service`] against the host and port of an HTTP endpoint.
pub async fn wait_for_endpoint(
    endpoint: &str,
    config: &ReadinessConfig,
) -> Result<(), SearchError> {
    let url = Url::parse(endpoint)?;
    let host = url
        .host_str()
        .ok_or_else(|| SearchError::Request(format!("{endpoint} has no host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| SearchError::Request(format!("{endpoint} has no port")))?;
    wait_for_service(host, port, config).await
}
