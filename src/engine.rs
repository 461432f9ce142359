//! Composition root for the sync core
//!
//! A [`SyncEngine`] wires the config, stores, registry, REST client,
//! transport, dispatcher, and poller together once at application start.
//! Everything is an explicit instance threaded through constructors,
//! never a module-level global, so tests can build isolated engines.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::api::{ApiClient, TokenStore};
use crate::config::SyncConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::poller::{PollerConfig, PollerHandle, SnapshotPoller};
use crate::protocol::ClientMessage;
use crate::registry::{NoticeSeverity, OpsRegistry};
use crate::store::Stores;
use crate::transport::Transport;

/// The live-state synchronization engine
///
/// Owns the push transport and the snapshot poller; hands out shared
/// references to the stores and registry for the view layer to read.
pub struct SyncEngine {
    config: SyncConfig,
    client_id: String,
    stores: Arc<Stores>,
    registry: Arc<OpsRegistry>,
    api: Arc<ApiClient>,
    transport: Arc<Transport>,
    dispatcher: Arc<Dispatcher>,
    poller: Mutex<Option<PollerHandle>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Build an engine with the default durable token store.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let tokens = TokenStore::new()?;
        Ok(Self::with_token_store(config, tokens))
    }

    /// Build an engine around an explicit token store (tests use a
    /// tempdir-backed one).
    pub fn with_token_store(config: SyncConfig, tokens: TokenStore) -> Self {
        let stores = Arc::new(Stores::new());
        let registry = Arc::new(OpsRegistry::new());
        let api = Arc::new(ApiClient::new(config.clone(), tokens));
        let transport = Arc::new(Transport::new(config.reconnect.clone()));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&stores), Arc::clone(&registry)));

        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let client_id = format!("dash_{}", &uuid[..8]);

        Self {
            config,
            client_id,
            stores,
            registry,
            api,
            transport,
            dispatcher,
            poller: Mutex::new(None),
            dispatch_task: Mutex::new(None),
        }
    }

    /// Start the sync loops and open the global push channel.
    ///
    /// The poller and dispatcher start unconditionally so the dashboard
    /// has data even when the push channel is down; a connect failure is
    /// surfaced as a notification and returned.
    pub async fn start(&self) -> Result<()> {
        {
            let mut dispatch_task = self.dispatch_task.lock();
            if dispatch_task.is_none() {
                let dispatcher = Arc::clone(&self.dispatcher);
                let envelopes = self.transport.subscribe_envelopes();
                *dispatch_task = Some(tokio::spawn(dispatcher.run(envelopes)));
            }
        }
        {
            let mut poller = self.poller.lock();
            if poller.is_none() {
                let snapshot_poller = SnapshotPoller::with_config(
                    Arc::clone(&self.api),
                    Arc::clone(&self.stores),
                    Arc::clone(&self.registry),
                    PollerConfig {
                        interval: self.config.poll_interval,
                        ..PollerConfig::default()
                    },
                );
                *poller = Some(snapshot_poller.start());
            }
        }

        tracing::info!(client_id = %self.client_id, "sync engine started");

        let url = self.config.system_channel_url();
        if let Err(e) = self.transport.connect(&url).await {
            self.registry
                .add(NoticeSeverity::Error, format!("push channel down: {}", e));
            return Err(e);
        }
        Ok(())
    }

    /// Switch the push channel to a single scan's event stream and mark
    /// that scan current when it is already in the collection.
    pub async fn watch_scan(&self, scan_id: u64) -> Result<()> {
        self.stores.scans.set_current(Some(scan_id));
        self.transport.disconnect();
        self.transport
            .connect(&self.config.scan_channel_url(scan_id))
            .await
    }

    /// Return to the global push channel.
    pub async fn watch_system(&self) -> Result<()> {
        self.transport.disconnect();
        self.transport
            .connect(&self.config.system_channel_url())
            .await
    }

    /// Manual retry after the transport reported Failed. Resets the
    /// attempt counter.
    pub async fn reconnect(&self) -> Result<()> {
        self.transport
            .connect(&self.config.system_channel_url())
            .await
    }

    /// Keepalive probe over the push channel.
    pub fn ping(&self) -> bool {
        self.transport.send(ClientMessage::Ping.to_json())
    }

    /// Stop the poller, the dispatcher, and the transport. Idempotent.
    pub fn shutdown(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.stop();
        }
        if let Some(task) = self.dispatch_task.lock().take() {
            task.abort();
        }
        self.transport.disconnect();
        tracing::info!(client_id = %self.client_id, "sync engine stopped");
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    pub fn registry(&self) -> &Arc<OpsRegistry> {
        &self.registry
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ConnectionState;

    fn test_engine() -> (tempfile::TempDir, SyncEngine) {
        let dir = tempfile::tempdir().unwrap();
        let tokens = TokenStore::at_path(dir.path().join("token"));
        let config = SyncConfig::new("http://127.0.0.1:9", "ws://127.0.0.1:9").unwrap();
        (dir, SyncEngine::with_token_store(config, tokens))
    }

    #[test]
    fn test_engines_are_isolated() {
        let (_d1, a) = test_engine();
        let (_d2, b) = test_engine();
        a.stores().scans.upsert(crate::store::ScanPatch {
            id: 1,
            ..Default::default()
        });
        assert_eq!(a.stores().scans.len(), 1);
        assert!(b.stores().scans.is_empty());
        assert_ne!(a.client_id(), b.client_id());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (_dir, engine) = test_engine();
        engine.shutdown();
        engine.shutdown();
        assert_eq!(engine.transport().state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_ping_without_connection_is_dropped() {
        let (_dir, engine) = test_engine();
        assert!(!engine.ping());
    }
}
