//! REST snapshot client and durable token storage
//!
//! Read-only client for the backend's paginated list endpoints. Snapshot
//! bodies feed [`crate::store::EntityStore::replace_all`]; the poller owns
//! the fetch cadence, this module owns the wire details:
//!
//! - both `{"data": [...]}` and `{"items": [...]}` body shapes are accepted
//! - each list element is decoded individually, so one malformed record is
//!   logged and skipped instead of failing the whole batch
//! - the bearer token comes from [`TokenStore`]; a 401 clears it and maps
//!   to [`SyncError::Unauthorized`]
//! - any other non-2xx maps to [`SyncError::Request`], carrying the
//!   server-provided message when the body has one

use std::path::PathBuf;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::store::{AiInsight, Finding, Project, Scan};

/// One page of an authoritative snapshot
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Deserialize)]
struct WirePage {
    #[serde(alias = "items")]
    data: Vec<serde_json::Value>,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    limit: u64,
    #[serde(default)]
    offset: u64,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(alias = "error", alias = "detail")]
    message: String,
}

// ============================================================================
// Token storage
// ============================================================================

/// Durable client-side storage for the bearer token
///
/// One small file under the user config dir. The in-memory copy is loaded
/// once at construction; `save` and `clear` write through.
pub struct TokenStore {
    path: PathBuf,
    token: Mutex<Option<String>>,
}

impl TokenStore {
    /// Store under the per-user config directory (`…/aegis/token`).
    pub fn new() -> Result<Self> {
        let base = dirs::config_dir().ok_or_else(|| SyncError::Config {
            message: "no user config directory available".into(),
        })?;
        Ok(Self::at_path(base.join("aegis").join("token")))
    }

    /// Store at an explicit path (tests use a tempdir).
    pub fn at_path(path: PathBuf) -> Self {
        let token = match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let trimmed = raw.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Err(_) => None,
        };
        Self {
            path,
            token: Mutex::new(token),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.token.lock().clone()
    }

    pub fn save(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)?;
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    /// Forget the token in memory and on disk.
    pub fn clear(&self) -> Result<()> {
        *self.token.lock() = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Snapshot client
// ============================================================================

/// Read-only client for the snapshot endpoints
pub struct ApiClient {
    http: reqwest::Client,
    config: SyncConfig,
    tokens: TokenStore,
}

impl ApiClient {
    pub fn new(config: SyncConfig, tokens: TokenStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub async fn fetch_projects(&self, limit: u64, offset: u64) -> Result<Page<Project>> {
        self.fetch_page("projects", limit, offset).await
    }

    pub async fn fetch_scans(&self, limit: u64, offset: u64) -> Result<Page<Scan>> {
        self.fetch_page("scans", limit, offset).await
    }

    pub async fn fetch_findings(&self, limit: u64, offset: u64) -> Result<Page<Finding>> {
        self.fetch_page("findings", limit, offset).await
    }

    pub async fn fetch_insights(&self, limit: u64, offset: u64) -> Result<Page<AiInsight>> {
        self.fetch_page("ai/insights", limit, offset).await
    }

    /// Fetch one page of a collection endpoint.
    async fn fetch_page<T: DeserializeOwned>(
        &self,
        path: &str,
        limit: u64,
        offset: u64,
    ) -> Result<Page<T>> {
        let mut request = self
            .http
            .get(self.config.endpoint(path))
            .query(&[("limit", limit), ("offset", offset)]);
        if let Some(token) = self.tokens.current() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.as_u16() == 401 {
            // Session over: forget the credential, the embedder re-authenticates
            if let Err(e) = self.tokens.clear() {
                tracing::warn!(error = %e, "failed to clear stored token");
            }
            return Err(SyncError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<WireError>(&body)
                .map(|e| e.message)
                .unwrap_or_else(|_| "request failed".to_string());
            return Err(SyncError::Request {
                status: status.as_u16(),
                message,
            });
        }

        let wire: WirePage = response.json().await?;
        Ok(Page {
            items: decode_items(path, wire.data),
            total: wire.total,
            limit: wire.limit,
            offset: wire.offset,
        })
    }
}

/// Decode snapshot elements one by one, skipping malformed records.
fn decode_items<T: DeserializeOwned>(path: &str, raw: Vec<serde_json::Value>) -> Vec<T> {
    let mut items = Vec::with_capacity(raw.len());
    for value in raw {
        match serde_json::from_value::<T>(value) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!(endpoint = path, error = %e, "skipping malformed snapshot record");
            }
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScanStatus;

    #[test]
    fn test_wire_page_accepts_data_and_items_keys() {
        let a: WirePage =
            serde_json::from_str(r#"{"data":[{"id":1}],"total":1,"limit":25,"offset":0}"#).unwrap();
        assert_eq!(a.data.len(), 1);

        let b: WirePage =
            serde_json::from_str(r#"{"items":[{"id":1},{"id":2}],"total":2,"limit":25,"offset":0}"#)
                .unwrap();
        assert_eq!(b.data.len(), 2);
    }

    #[test]
    fn test_decode_items_skips_malformed_records() {
        let raw = vec![
            serde_json::json!({
                "id": 1,
                "target": "10.0.0.1",
                "status": "running",
                "created_at": "2026-01-01T00:00:00Z",
                "updated_at": "2026-01-01T00:00:00Z"
            }),
            // Missing required fields: skipped, not fatal
            serde_json::json!({"bogus": true}),
            serde_json::json!({
                "id": 2,
                "target": "10.0.0.2",
                "status": "queued",
                "created_at": "2026-01-02T00:00:00Z",
                "updated_at": "2026-01-02T00:00:00Z"
            }),
        ];
        let scans: Vec<Scan> = decode_items("scans", raw);
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].status, ScanStatus::Running);
        assert_eq!(scans[1].id, 2);
    }

    #[test]
    fn test_wire_error_message_aliases() {
        let a: WireError = serde_json::from_str(r#"{"message":"scan not found"}"#).unwrap();
        assert_eq!(a.message, "scan not found");
        let b: WireError = serde_json::from_str(r#"{"error":"backend overloaded"}"#).unwrap();
        assert_eq!(b.message, "backend overloaded");
    }

    #[test]
    fn test_token_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("token");

        let store = TokenStore::at_path(path.clone());
        assert!(store.current().is_none());

        store.save("tok_abc123").unwrap();
        assert_eq!(store.current().as_deref(), Some("tok_abc123"));

        // A fresh store re-reads the persisted token
        let reloaded = TokenStore::at_path(path.clone());
        assert_eq!(reloaded.current().as_deref(), Some("tok_abc123"));

        store.clear().unwrap();
        assert!(store.current().is_none());
        assert!(!path.exists());
        // Clearing twice is fine
        store.clear().unwrap();
    }
}
