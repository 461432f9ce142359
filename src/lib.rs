//! Aegis Sync: live-state synchronization core for the Aegis security
//! scanning dashboard
//!
//! This library keeps a dashboard's in-memory collections (projects,
//! scans, findings, AI insights, notifications) synchronized with a remote
//! scanning backend over two paths at once:
//!
//! - a resilient WebSocket **push channel** delivering incremental deltas,
//!   with linear-backoff reconnect and a bounded diagnostic history
//! - periodic **REST snapshots** that authoritatively replace each
//!   collection, repairing whatever the push channel missed
//!
//! The view layer only ever reads store state and calls store mutation
//! methods or [`Transport::send`]; it never touches the socket.
//!
//! # Example
//!
//! ```ignore
//! use aegis_sync::{SyncConfig, SyncEngine};
//!
//! let config = SyncConfig::from_env()?;
//! let engine = SyncEngine::new(config)?;
//! engine.start().await?;
//!
//! let scans = engine.stores().scans.visible();
//! println!("{} scans on page 1", scans.len());
//! ```

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use api::{ApiClient, Page, TokenStore};
pub use config::{ReconnectPolicy, SyncConfig};
pub use dispatcher::Dispatcher;
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use poller::{PollerConfig, PollerHandle, SnapshotPoller};
pub use protocol::{ClientMessage, Envelope, PushMessage};
pub use registry::{NoticeSeverity, Notification, OpsRegistry};
pub use store::{
    AiInsight, EntityStore, Filter, Finding, FindingFilter, FindingStatus, InsightKind,
    Pagination, PaginationUpdate, Project, Record, Scan, ScanFilter, ScanStatus, Severity,
    SortKey, SortOrder, Stores, UpsertOutcome,
};
pub use transport::{ConnectionState, MessageHistory, Transport, HISTORY_CAP};
