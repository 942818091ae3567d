//! Backend Health Prober
//!
//! Every cycle fans out one probe per configured backend concurrently,
//! each with its own deadline. A probe is a GET to `/health`; it succeeds
//! iff the response completes with HTTP 200. Only after *all* probes of a
//! cycle finish is the published healthy-set replaced, in one swap - an
//! observer never sees a partial update.
//!
//! The healthy-set preserves configured pool order, which keeps the
//! dispatcher's modulo selection deterministic for a fixed set.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

/// Deadline for a single probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct HealthProber {
    backends: Vec<String>,
    client: reqwest::Client,
    healthy: RwLock<Arc<Vec<String>>>,
}

impl HealthProber {
    /// A prober over `backends`, each an `addr:port` string. The healthy-set
    /// starts empty until the first cycle completes.
    pub fn new(backends: Vec<String>) -> Self {
        Self {
            backends,
            client: reqwest::Client::new(),
            healthy: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn backends(&self) -> &[String] {
        &self.backends
    }

    /// Snapshot of the currently published healthy-set.
    pub async fn healthy_set(&self) -> Arc<Vec<String>> {
        self.healthy.read().await.clone()
    }

    /// Probe every backend concurrently, wait for all probes to finish,
    /// then publish the new healthy-set in a single swap.
    pub async fn probe_cycle(&self) {
        let probes = self.backends.iter().map(|backend| self.probe(backend));
        let results = join_all(probes).await;

        let healthy: Vec<String> = self
            .backends
            .iter()
            .zip(results)
            .filter_map(|(backend, ok)| ok.then(|| backend.clone()))
            .collect();

        if healthy.len() < self.backends.len() {
            info!(
                healthy = healthy.len(),
                pool = self.backends.len(),
                "some backends failed their health probe"
            );
        } else {
            debug!(healthy = healthy.len(), "probe cycle finished");
        }

        *self.healthy.write().await = Arc::new(healthy);
    }

    async fn probe(&self, backend: &str) -> bool {
        let url = format!("http://{backend}/health");
        match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(err) => {
                debug!(backend, %err, "health probe failed");
                false
            }
        }
    }

    /// Run probe cycles on a fixed interval until shutdown is signalled.
    /// The first cycle runs immediately.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.probe_cycle().await,
                _ = shutdown_rx.changed() => break,
            }
        }
    }
}
