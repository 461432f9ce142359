//! Periodic snapshot refresh for the dashboard collections
//!
//! Background tasks that fetch authoritative snapshots and replace the
//! store contents. Push deltas keep the stores live between ticks; the
//! poll repairs anything the push channel missed (reconnect gaps, lagged
//! consumers, server-side compaction).
//!
//! Each tick flips the collection's loading flag around the fetch and
//! emits a user-facing notification when a fetch fails. A stale response
//! is simply applied; the next tick overwrites it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::registry::{NoticeSeverity, OpsRegistry};
use crate::store::Stores;

/// Configuration for snapshot polling
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval between snapshot fetches (default: 30s)
    pub interval: Duration,
    /// Page size requested from the list endpoints (default: 200)
    pub page_size: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            page_size: 200,
        }
    }
}

/// Snapshot poller for the four REST-backed collections
pub struct SnapshotPoller {
    api: Arc<ApiClient>,
    stores: Arc<Stores>,
    registry: Arc<OpsRegistry>,
    config: PollerConfig,
}

impl SnapshotPoller {
    pub fn new(api: Arc<ApiClient>, stores: Arc<Stores>, registry: Arc<OpsRegistry>) -> Self {
        Self::with_config(api, stores, registry, PollerConfig::default())
    }

    pub fn with_config(
        api: Arc<ApiClient>,
        stores: Arc<Stores>,
        registry: Arc<OpsRegistry>,
        config: PollerConfig,
    ) -> Self {
        Self {
            api,
            stores,
            registry,
            config,
        }
    }

    /// Start the fetch loops, one task per collection.
    ///
    /// Each loop fetches immediately, then every `interval`. Returns a
    /// handle that stops the loops; the handle also stops them on drop.
    pub fn start(self) -> PollerHandle {
        let running = Arc::new(AtomicBool::new(true));
        let mut tasks = Vec::with_capacity(4);

        for collection in [
            Collection::Projects,
            Collection::Scans,
            Collection::Findings,
            Collection::Insights,
        ] {
            let api = Arc::clone(&self.api);
            let stores = Arc::clone(&self.stores);
            let registry = Arc::clone(&self.registry);
            let running = Arc::clone(&running);
            let config = self.config.clone();

            tasks.push(tokio::spawn(async move {
                loop {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    refresh_once(collection, &api, &stores, &registry, config.page_size).await;
                    tokio::time::sleep(config.interval).await;
                }
            }));
        }

        PollerHandle { running, tasks }
    }

    /// One synchronous-feeling refresh of every collection (manual retry,
    /// initial hydration, tests).
    pub async fn refresh_all(&self) {
        for collection in [
            Collection::Projects,
            Collection::Scans,
            Collection::Findings,
            Collection::Insights,
        ] {
            refresh_once(
                collection,
                &self.api,
                &self.stores,
                &self.registry,
                self.config.page_size,
            )
            .await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection {
    Projects,
    Scans,
    Findings,
    Insights,
}

impl Collection {
    fn loading_key(self) -> &'static str {
        match self {
            Self::Projects => "projects.refresh",
            Self::Scans => "scans.refresh",
            Self::Findings => "findings.refresh",
            Self::Insights => "insights.refresh",
        }
    }
}

async fn refresh_once(
    collection: Collection,
    api: &ApiClient,
    stores: &Stores,
    registry: &OpsRegistry,
    page_size: u64,
) {
    let key = collection.loading_key();
    registry.set_loading(key, true);

    let outcome = match collection {
        Collection::Projects => api
            .fetch_projects(page_size, 0)
            .await
            .map(|page| stores.projects.replace_all(page.items)),
        Collection::Scans => api
            .fetch_scans(page_size, 0)
            .await
            .map(|page| stores.scans.replace_all(page.items)),
        Collection::Findings => api
            .fetch_findings(page_size, 0)
            .await
            .map(|page| stores.findings.replace_all(page.items)),
        Collection::Insights => api
            .fetch_insights(page_size, 0)
            .await
            .map(|page| stores.insights.replace_all(page.items)),
    };

    if let Err(e) = outcome {
        tracing::warn!(collection = key, error = %e, "snapshot fetch failed");
        registry.add(NoticeSeverity::Error, e.to_string());
    }
    registry.set_loading(key, false);
}

/// Handle for controlling the running fetch loops
pub struct PollerHandle {
    running: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PollerHandle {
    /// Stop the fetch loops, cancelling any pending interval sleep.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_config_default() {
        let config = PollerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.page_size, 200);
    }

    #[test]
    fn test_loading_keys_are_distinct() {
        let keys = [
            Collection::Projects.loading_key(),
            Collection::Scans.loading_key(),
            Collection::Findings.loading_key(),
            Collection::Insights.loading_key(),
        ];
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }
}
