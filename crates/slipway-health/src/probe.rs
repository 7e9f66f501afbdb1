//! HTTP instance probes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use slipway_platform::InstanceEndpoint;

/// Result of a single instance probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The probe endpoint returned 2xx.
    Healthy,
    /// The probe endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

impl ProbeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Healthy => "healthy",
            ProbeOutcome::Unhealthy => "unhealthy",
            ProbeOutcome::Failed => "failed",
        }
    }
}

/// Probes one instance's health endpoint.
#[async_trait]
pub trait InstanceProber: Send + Sync {
    async fn probe(&self, endpoint: &InstanceEndpoint, path: &str) -> ProbeOutcome;
}

/// Probes over plain HTTP/1.1 with a per-probe timeout.
pub struct HttpProber {
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl InstanceProber for HttpProber {
    async fn probe(&self, endpoint: &InstanceEndpoint, path: &str) -> ProbeOutcome {
        http_probe(&endpoint.socket_addr(), path, self.timeout).await
    }
}

/// Perform an HTTP health probe against an address.
///
/// Returns `Healthy` for 2xx, `Unhealthy` for any other status, and
/// `Failed` when the connection cannot be made or the timeout elapses.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeOutcome {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "probe connection failed");
                return ProbeOutcome::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "probe handshake failed");
                return ProbeOutcome::Failed;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "slipway-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "probe request invalid");
                return ProbeOutcome::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                if resp.status().is_success() {
                    ProbeOutcome::Healthy
                } else {
                    debug!(status = %resp.status(), %uri, "probe non-2xx");
                    ProbeOutcome::Unhealthy
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "probe request failed");
                ProbeOutcome::Failed
            }
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(%uri, "probe timed out");
            ProbeOutcome::Failed
        }
    }
}

/// Scriptable prober for tests and the daemon's local mode. Unscripted
/// addresses report the default outcome.
pub struct FakeProber {
    default: ProbeOutcome,
    outcomes: Mutex<HashMap<String, ProbeOutcome>>,
}

impl FakeProber {
    pub fn healthy() -> Self {
        Self {
            default: ProbeOutcome::Healthy,
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            default: ProbeOutcome::Failed,
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    /// Script the outcome for one instance's socket address.
    pub async fn set_outcome(&self, address: &str, outcome: ProbeOutcome) {
        self.outcomes
            .lock()
            .await
            .insert(address.to_string(), outcome);
    }
}

#[async_trait]
impl InstanceProber for FakeProber {
    async fn probe(&self, endpoint: &InstanceEndpoint, _path: &str) -> ProbeOutcome {
        let outcomes = self.outcomes.lock().await;
        outcomes
            .get(&endpoint.socket_addr())
            .copied()
            .unwrap_or(self.default)
    }
}
