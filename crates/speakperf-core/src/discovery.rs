//! API discovery against a live runtime.
//!
//! Probing is sequential: services in id order, then conventional paths in
//! list order. Every accepted spec is persisted before the next probe runs.

use crate::errors::{PerfError, PerfResult};
use crate::storage::store::Store;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Conventional spec locations, probed in this order.
pub const SPEC_PATHS: &[&str] = &[
    "/swagger.json",
    "/openapi.json",
    "/api-docs",
    "/v2/api-docs",
    "/v3/api-docs",
    "/api/swagger.json",
    "/api/openapi.json",
    "/api/v3/openapi.json",
];

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe cancelled")]
    Cancelled,
    #[error("request failed: {0}")]
    Transport(String),
}

/// HTTP seam used for discovery probes. Returns the response status.
#[async_trait]
pub trait SpecProbe: Send + Sync {
    async fn probe(&self, url: &str, cancel: &CancellationToken) -> Result<u16, ProbeError>;
}

#[derive(Clone, Default)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SpecProbe for HttpProbe {
    async fn probe(&self, url: &str, cancel: &CancellationToken) -> Result<u16, ProbeError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProbeError::Cancelled),
            res = self.client.get(url).send() => res
                .map(|r| r.status().as_u16())
                .map_err(|e| ProbeError::Transport(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecRef {
    /// `None` when the row could not be recorded.
    pub id: Option<i64>,
    pub service_id: Option<i64>,
    pub spec_url: String,
}

pub struct DiscoveryRequest<'a> {
    pub session_id: i64,
    pub explicit_paths: &'a [String],
    pub auto_discover: bool,
    pub probe_host: &'a str,
}

/// Explicit paths are recorded verbatim; auto-discovery then probes every
/// service that publishes a port.
pub async fn discover(
    store: &Store,
    probe: &dyn SpecProbe,
    req: &DiscoveryRequest<'_>,
    cancel: &CancellationToken,
) -> PerfResult<Vec<SpecRef>> {
    let mut found = Vec::new();

    for path in req.explicit_paths {
        found.push(persist(store, req.session_id, None, path));
    }

    if !req.auto_discover {
        return Ok(found);
    }

    let services = store
        .services_for_session(req.session_id)
        .map_err(PerfError::store)?;

    for svc in services {
        let Some(port) = svc.host_port() else {
            tracing::debug!(event = "discovery_skip_service", service = %svc.name, reason = "no_ports");
            continue;
        };
        let base = format!("http://{}:{}", req.probe_host, port);

        for path in SPEC_PATHS {
            if cancel.is_cancelled() {
                return Err(PerfError::Cancelled);
            }
            let url = format!("{base}{path}");
            match probe.probe(&url, cancel).await {
                Ok(200) => {
                    tracing::info!(event = "spec_discovered", service = %svc.name, url = %url);
                    found.push(persist(store, req.session_id, Some(svc.id), &url));
                }
                Ok(status) => {
                    tracing::debug!(event = "spec_probe_miss", url = %url, status);
                }
                Err(ProbeError::Cancelled) => return Err(PerfError::Cancelled),
                Err(e) => {
                    tracing::debug!(event = "spec_probe_miss", url = %url, error = %e);
                }
            }
        }
    }

    Ok(found)
}

fn persist(store: &Store, session_id: i64, service_id: Option<i64>, url: &str) -> SpecRef {
    let id = match store.record_spec(session_id, service_id, url, None, None) {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(event = "spec_record_failed", session_id, url = %url, error = %format!("{e:#}"));
            None
        }
    };
    SpecRef {
        id,
        service_id,
        spec_url: url.to_string(),
    }
}
