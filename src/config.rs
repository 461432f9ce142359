//! Environment-resolved configuration for the sync core
//!
//! Two base URLs are resolved once at process start: one for the REST
//! snapshot endpoints, one for the push channel. There is no runtime
//! reconfiguration; embedders build a new engine instead.

use std::env;
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Environment variable naming the REST base URL
pub const API_BASE_ENV: &str = "AEGIS_API_BASE";
/// Environment variable naming the push channel base URL
pub const WS_BASE_ENV: &str = "AEGIS_WS_BASE";

/// Reconnect policy for the push channel
///
/// Linear backoff: attempt n waits `base_delay * n`, capped at
/// `max_attempts` before the transport reports Failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay multiplier (default: 1s)
    pub base_delay: Duration,
    /// Attempts before giving up (default: 5)
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.max(1)
    }

    /// Whether `attempt` (1-based) is still within the retry budget.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

/// Configuration for a sync engine instance
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// REST base URL, e.g. `https://api.aegis.example`
    pub api_base: String,
    /// Push channel base URL, e.g. `wss://api.aegis.example`
    pub ws_base: String,
    /// Reconnect behavior for the push channel
    pub reconnect: ReconnectPolicy,
    /// Interval between authoritative snapshot fetches
    pub poll_interval: Duration,
}

impl SyncConfig {
    /// Create a config from explicit base URLs.
    pub fn new(api_base: impl Into<String>, ws_base: impl Into<String>) -> Result<Self> {
        let api_base = normalize_base(api_base.into(), &["http://", "https://"])?;
        let ws_base = normalize_base(ws_base.into(), &["ws://", "wss://"])?;
        Ok(Self {
            api_base,
            ws_base,
            reconnect: ReconnectPolicy::default(),
            poll_interval: Duration::from_secs(30),
        })
    }

    /// Resolve configuration from the environment.
    ///
    /// Reads `AEGIS_API_BASE` and `AEGIS_WS_BASE`. Called once at startup;
    /// a missing variable is a configuration error, not a fallback.
    pub fn from_env() -> Result<Self> {
        let api_base = env::var(API_BASE_ENV).map_err(|_| SyncError::Config {
            message: format!("{} is not set", API_BASE_ENV),
        })?;
        let ws_base = env::var(WS_BASE_ENV).map_err(|_| SyncError::Config {
            message: format!("{} is not set", WS_BASE_ENV),
        })?;
        Self::new(api_base, ws_base)
    }

    /// Push channel URL scoped to a single scan.
    pub fn scan_channel_url(&self, scan_id: u64) -> String {
        format!("{}/ws/scans/{}", self.ws_base, scan_id)
    }

    /// Global push channel URL.
    pub fn system_channel_url(&self) -> String {
        format!("{}/ws/system", self.ws_base)
    }

    /// REST endpoint URL for a collection path such as `scans`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }
}

/// Validate a scheme prefix and strip any trailing slash.
fn normalize_base(base: String, schemes: &[&str]) -> Result<String> {
    if !schemes.iter().any(|s| base.starts_with(s)) {
        return Err(SyncError::Config {
            message: format!("base URL '{}' must start with one of {:?}", base, schemes),
        });
    }
    Ok(base.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delays_are_linear() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=5).map(|n| policy.delay_for(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 3000, 4000, 5000]);
        assert!(policy.allows(5));
        assert!(!policy.allows(6));
    }

    #[test]
    fn test_channel_urls() {
        let config = SyncConfig::new("https://api.aegis.example/", "wss://push.aegis.example").unwrap();
        assert_eq!(
            config.scan_channel_url(42),
            "wss://push.aegis.example/ws/scans/42"
        );
        assert_eq!(
            config.system_channel_url(),
            "wss://push.aegis.example/ws/system"
        );
        assert_eq!(config.endpoint("/scans"), "https://api.aegis.example/scans");
    }

    #[test]
    fn test_bad_scheme_rejected() {
        assert!(SyncConfig::new("ftp://nope", "wss://ok").is_err());
        assert!(SyncConfig::new("https://ok", "https://wrong-scheme").is_err());
    }
}
