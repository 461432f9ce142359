//! Push message routing
//!
//! Pure routing from an envelope's type tag to the one store operation
//! that owns that domain. Payloads are validated here, at the boundary:
//! anything that does not match a known shape is logged and dropped, and
//! unknown tags are ignored so the client stays forward compatible with
//! server-added message types. No business logic lives in this module.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::protocol::{Envelope, PushMessage};
use crate::registry::OpsRegistry;
use crate::store::Stores;

/// Routes decoded push messages to the owning store, set up once at
/// composition time
pub struct Dispatcher {
    stores: Arc<Stores>,
    registry: Arc<OpsRegistry>,
}

impl Dispatcher {
    pub fn new(stores: Arc<Stores>, registry: Arc<OpsRegistry>) -> Self {
        Self { stores, registry }
    }

    /// Decode and route a single envelope.
    pub fn dispatch(&self, envelope: &Envelope) {
        match PushMessage::decode(envelope) {
            Ok(Some(message)) => self.route(message),
            Ok(None) => {
                tracing::debug!(tag = %envelope.tag, "ignoring unknown message tag");
            }
            Err(e) => {
                tracing::warn!(tag = %envelope.tag, error = %e, "dropping mis-shaped payload");
            }
        }
    }

    fn route(&self, message: PushMessage) {
        match message {
            PushMessage::ScanCreated(scan) => {
                self.stores.scans.replace_one(scan);
            }
            PushMessage::ScanUpdate(patch) => {
                self.stores.scans.upsert(patch);
            }
            PushMessage::ScanDeleted { id } => {
                self.stores.scans.remove(id);
            }
            PushMessage::FindingNew(finding) => {
                self.stores.findings.replace_one(finding);
            }
            PushMessage::FindingUpdate(patch) => {
                self.stores.findings.upsert(patch);
            }
            PushMessage::FindingDeleted { id } => {
                self.stores.findings.remove(id);
            }
            PushMessage::ProjectUpdate(patch) => {
                self.stores.projects.upsert(patch);
            }
            PushMessage::ProjectDeleted { id } => {
                self.stores.projects.remove(id);
            }
            PushMessage::AiInsight(insight) => {
                self.stores.insights.replace_one(insight);
            }
            PushMessage::Notification { severity, message } => {
                self.registry.add(severity, message);
            }
            PushMessage::Pong => {
                tracing::trace!("pong");
            }
        }
    }

    /// Drain a transport envelope subscription until the channel closes.
    ///
    /// A lagged receiver (consumer slower than the push rate) drops the
    /// missed envelopes and keeps going; the next authoritative snapshot
    /// repairs anything lost.
    pub async fn run(self: Arc<Self>, mut envelopes: broadcast::Receiver<Envelope>) {
        loop {
            match envelopes.recv().await {
                Ok(envelope) => self.dispatch(&envelope),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "dispatcher lagged behind the push channel");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
