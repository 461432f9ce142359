//! Loading flags and the user-facing notification log
//!
//! Keyed in-flight flags let unrelated UI regions show independent
//! spinners; the notification log backs the toast surface. Both live in
//! one process-wide registry instance that is constructed at startup and
//! threaded through the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeSeverity {
    Info,
    Warning,
    Error,
}

impl NoticeSeverity {
    pub(crate) fn info() -> Self {
        Self::Info
    }
}

/// One entry in the notification log
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: u64,
    pub severity: NoticeSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// Process-wide operation flags and notification log
pub struct OpsRegistry {
    loading: Mutex<HashMap<String, bool>>,
    notifications: Mutex<Vec<Notification>>,
    next_id: AtomicU64,
}

impl Default for OpsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OpsRegistry {
    pub fn new() -> Self {
        Self {
            loading: Mutex::new(HashMap::new()),
            notifications: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    // ========================================================================
    // Loading flags
    // ========================================================================

    /// Flag a logical operation key as in-flight or idle.
    pub fn set_loading(&self, key: &str, in_flight: bool) {
        let mut loading = self.loading.lock();
        if in_flight {
            loading.insert(key.to_string(), true);
        } else {
            loading.remove(key);
        }
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.loading.lock().get(key).copied().unwrap_or(false)
    }

    /// True when any operation is in flight.
    pub fn any_loading(&self) -> bool {
        !self.loading.lock().is_empty()
    }

    // ========================================================================
    // Notification log
    // ========================================================================

    /// Append a notification, assigning a monotonically-unique id.
    ///
    /// A notification identical (severity + message) to the newest entry is
    /// coalesced into it instead of being appended, so reconnect storms do
    /// not flood the toast log. Returns the id of the appended or coalesced
    /// entry.
    pub fn add(&self, severity: NoticeSeverity, message: impl Into<String>) -> u64 {
        let message = message.into();
        let mut notifications = self.notifications.lock();

        if let Some(last) = notifications.last_mut() {
            if last.severity == severity && last.message == message {
                tracing::debug!(id = last.id, "coalescing duplicate notification");
                last.created_at = Utc::now();
                last.read = false;
                return last.id;
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        notifications.push(Notification {
            id,
            severity,
            message,
            created_at: Utc::now(),
            read: false,
        });
        id
    }

    /// Mark one notification as read. Unknown ids are a no-op.
    pub fn mark_read(&self, id: u64) -> bool {
        let mut notifications = self.notifications.lock();
        match notifications.iter_mut().find(|n| n.id == id) {
            Some(note) => {
                note.read = true;
                true
            }
            None => false,
        }
    }

    /// Remove one notification. Unknown ids are a no-op.
    pub fn remove(&self, id: u64) -> bool {
        let mut notifications = self.notifications.lock();
        let before = notifications.len();
        notifications.retain(|n| n.id != id);
        notifications.len() != before
    }

    pub fn clear(&self) {
        self.notifications.lock().clear();
    }

    /// Snapshot of the log in insertion order.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.lock().iter().filter(|n| !n.read).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loading_flags_are_independent() {
        let registry = OpsRegistry::new();
        registry.set_loading("scans.refresh", true);
        registry.set_loading("findings.refresh", true);
        registry.set_loading("findings.refresh", false);

        assert!(registry.is_loading("scans.refresh"));
        assert!(!registry.is_loading("findings.refresh"));
        assert!(!registry.is_loading("never.seen"));
        assert!(registry.any_loading());
    }

    #[test]
    fn test_notification_ids_are_monotonic() {
        let registry = OpsRegistry::new();
        let a = registry.add(NoticeSeverity::Info, "first");
        let b = registry.add(NoticeSeverity::Info, "second");
        let c = registry.add(NoticeSeverity::Error, "third");
        assert!(a < b && b < c);
    }

    #[test]
    fn test_duplicate_notifications_coalesce() {
        let registry = OpsRegistry::new();
        let a = registry.add(NoticeSeverity::Error, "connection lost");
        let b = registry.add(NoticeSeverity::Error, "connection lost");
        assert_eq!(a, b);
        assert_eq!(registry.notifications().len(), 1);

        // A different message breaks the run
        registry.add(NoticeSeverity::Error, "other");
        let c = registry.add(NoticeSeverity::Error, "connection lost");
        assert_ne!(a, c);
        assert_eq!(registry.notifications().len(), 3);
    }

    #[test]
    fn test_mark_read_and_remove() {
        let registry = OpsRegistry::new();
        let id = registry.add(NoticeSeverity::Warning, "scan slow");
        assert_eq!(registry.unread_count(), 1);

        assert!(registry.mark_read(id));
        assert_eq!(registry.unread_count(), 0);
        assert!(!registry.mark_read(9999));

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.notifications().is_empty());
    }

    #[test]
    fn test_clear_empties_log() {
        let registry = OpsRegistry::new();
        registry.add(NoticeSeverity::Info, "one");
        registry.add(NoticeSeverity::Info, "two");
        registry.clear();
        assert!(registry.notifications().is_empty());
    }
}
