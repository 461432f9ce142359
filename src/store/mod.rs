//! In-memory, mutation-gated collections for the dashboard entity families
//!
//! One store per entity family, all sharing a single generic pattern: a
//! canonical id-keyed collection, a "current item" reference, a filter
//! descriptor, and a pagination descriptor. Stores perform no I/O and are
//! mutated only through their own methods; the snapshot poller calls
//! [`EntityStore::replace_all`], the dispatcher calls
//! [`EntityStore::upsert`] / [`EntityStore::remove`], and consumers read
//! [`EntityStore::visible`].
//!
//! # Thread Safety
//!
//! - `parking_lot::RwLock` per store: concurrent reads, exclusive writes
//! - Guards are held for the duration of one operation, never across I/O
//!
//! # Delta Policies
//!
//! - A patch for an unknown id is an implicit insert: the patch is
//!   materialized into a full record, defaulting omitted fields. The next
//!   authoritative snapshot overwrites any defaults.
//! - A patch whose `updated_at` is strictly older than the stored record's
//!   is dropped (last-logical-update-wins). Patches without a timestamp
//!   apply in arrival order.

pub mod records;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub use records::{
    AiInsight, AiInsightPatch, Finding, FindingFilter, FindingFilterUpdate, FindingPatch,
    FindingStatus, InsightFilter, InsightFilterUpdate, InsightKind, Project, ProjectFilter,
    ProjectFilterUpdate, ProjectPatch, Scan, ScanFilter, ScanFilterUpdate, ScanPatch, ScanStatus,
    Severity,
};

/// A record stored in an [`EntityStore`]
///
/// Implementations pair a full record with its explicit partial-record
/// patch type and define the field-level shallow merge between them.
pub trait Record: Clone + Send + Sync + 'static {
    type Patch: Clone + Send + Sync + 'static;

    fn id(&self) -> u64;
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;

    /// Identifier carried by a patch
    fn patch_id(patch: &Self::Patch) -> u64;
    /// Logical update timestamp carried by a patch, if any
    fn patch_updated_at(patch: &Self::Patch) -> Option<DateTime<Utc>>;

    /// Field-level shallow merge: present patch fields win, omitted fields
    /// are preserved.
    fn merge(&mut self, patch: Self::Patch);

    /// Build a full record from a patch, defaulting omitted fields
    /// (implicit-insert policy).
    fn materialize(patch: Self::Patch) -> Self;
}

/// A pure predicate over records of one entity family
pub trait Filter<R>: Default + Clone + Send + Sync + 'static {
    type Update;

    /// Merge a partial update into this descriptor.
    fn merge(&mut self, update: Self::Update);

    /// Whether `record` is admitted by the current facets.
    fn matches(&self, record: &R) -> bool;
}

/// Sort key for the derived view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    CreatedAt,
    UpdatedAt,
    Id,
}

/// Sort direction for the derived view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Pagination descriptor: purely a view over the filtered collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page index
    pub page: usize,
    pub page_size: usize,
    pub sort_key: SortKey,
    pub sort_order: SortOrder,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 25,
            sort_key: SortKey::CreatedAt,
            sort_order: SortOrder::Descending,
        }
    }
}

/// Partial update for [`Pagination`]
#[derive(Debug, Clone, Default)]
pub struct PaginationUpdate {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub sort_key: Option<SortKey>,
    pub sort_order: Option<SortOrder>,
}

impl Pagination {
    fn merge(&mut self, update: PaginationUpdate) {
        if let Some(page) = update.page {
            self.page = page.max(1);
        }
        if let Some(page_size) = update.page_size {
            self.page_size = page_size.max(1);
        }
        if let Some(sort_key) = update.sort_key {
            self.sort_key = sort_key;
        }
        if let Some(sort_order) = update.sort_order {
            self.sort_order = sort_order;
        }
    }
}

/// Outcome of applying a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Unknown id, patch materialized into a new record
    Inserted,
    /// Existing record merged with the patch
    Merged,
    /// Patch was older than the stored record and was dropped
    Stale,
}

struct StoreState<R, F> {
    records: HashMap<u64, R>,
    current: Option<u64>,
    filter: F,
    pagination: Pagination,
}

/// Canonical collection plus derived-view logic for one entity family
pub struct EntityStore<R: Record, F: Filter<R>> {
    state: RwLock<StoreState<R, F>>,
}

impl<R: Record, F: Filter<R>> Default for EntityStore<R, F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record, F: Filter<R>> EntityStore<R, F> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState {
                records: HashMap::new(),
                current: None,
                filter: F::default(),
                pagination: Pagination::default(),
            }),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Atomically swap the collection with an authoritative snapshot.
    ///
    /// Clears the "current" reference when its id no longer exists. Empty
    /// input is the valid "no records" state. A duplicate id inside the
    /// snapshot keeps the later element and logs the collision.
    pub fn replace_all(&self, records: Vec<R>) {
        let mut state = self.state.write();
        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            if map.insert(record.id(), record).is_some() {
                tracing::warn!("snapshot contained duplicate id, keeping the later record");
            }
        }
        state.records = map;
        if let Some(current) = state.current {
            if !state.records.contains_key(&current) {
                state.current = None;
            }
        }
    }

    /// Apply a push delta: merge into an existing record or insert a new one.
    pub fn upsert(&self, patch: R::Patch) -> UpsertOutcome {
        let id = R::patch_id(&patch);
        let mut state = self.state.write();
        match state.records.get_mut(&id) {
            Some(existing) => {
                if let Some(patched_at) = R::patch_updated_at(&patch) {
                    if patched_at < existing.updated_at() {
                        tracing::debug!(id, "dropping stale delta");
                        return UpsertOutcome::Stale;
                    }
                }
                existing.merge(patch);
                UpsertOutcome::Merged
            }
            None => {
                state.records.insert(id, R::materialize(patch));
                UpsertOutcome::Inserted
            }
        }
    }

    /// Insert or overwrite one full record (push-delivered create events).
    ///
    /// Subject to the same last-logical-update-wins policy as [`upsert`]:
    /// a record strictly older than the stored one is dropped.
    ///
    /// [`upsert`]: EntityStore::upsert
    pub fn replace_one(&self, record: R) -> UpsertOutcome {
        let mut state = self.state.write();
        let outcome = match state.records.get(&record.id()) {
            Some(existing) if record.updated_at() < existing.updated_at() => UpsertOutcome::Stale,
            Some(_) => UpsertOutcome::Merged,
            None => UpsertOutcome::Inserted,
        };
        if outcome == UpsertOutcome::Stale {
            tracing::debug!(id = record.id(), "dropping stale record");
        } else {
            state.records.insert(record.id(), record);
        }
        outcome
    }

    /// Remove a record. Removing a missing id is a silent no-op.
    pub fn remove(&self, id: u64) -> bool {
        let mut state = self.state.write();
        let removed = state.records.remove(&id).is_some();
        if removed && state.current == Some(id) {
            state.current = None;
        }
        removed
    }

    /// Set the "current item" reference.
    ///
    /// Returns false (and leaves the reference unchanged) when the id is
    /// not present in the collection.
    pub fn set_current(&self, id: Option<u64>) -> bool {
        let mut state = self.state.write();
        match id {
            Some(id) if !state.records.contains_key(&id) => false,
            other => {
                state.current = other;
                true
            }
        }
    }

    /// Merge a partial filter update into the descriptor.
    pub fn set_filter(&self, update: F::Update) {
        self.state.write().filter.merge(update);
    }

    /// Merge a partial pagination update into the descriptor.
    pub fn set_pagination(&self, update: PaginationUpdate) {
        self.state.write().pagination.merge(update);
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<R> {
        self.state.read().records.get(&id).cloned()
    }

    /// The record the "current" reference names, if any.
    pub fn current(&self) -> Option<R> {
        let state = self.state.read();
        state.current.and_then(|id| state.records.get(&id).cloned())
    }

    pub fn filter(&self) -> F {
        self.state.read().filter.clone()
    }

    pub fn pagination(&self) -> Pagination {
        self.state.read().pagination.clone()
    }

    /// Number of records admitted by the filter, before pagination.
    pub fn total_matching(&self) -> usize {
        let state = self.state.read();
        state
            .records
            .values()
            .filter(|r| state.filter.matches(r))
            .count()
    }

    /// The derived view: filter predicate, deterministic sort, page slice.
    ///
    /// Recomputed on every call so it always reflects the latest
    /// collection, filter, and pagination. Default order is `created_at`
    /// descending; ties break by id ascending so pagination is stable
    /// across calls.
    pub fn visible(&self) -> Vec<R> {
        let state = self.state.read();
        let mut admitted: Vec<&R> = state
            .records
            .values()
            .filter(|r| state.filter.matches(r))
            .collect();

        let pagination = &state.pagination;
        admitted.sort_by(|a, b| {
            let key = match pagination.sort_key {
                SortKey::CreatedAt => a.created_at().cmp(&b.created_at()),
                SortKey::UpdatedAt => a.updated_at().cmp(&b.updated_at()),
                SortKey::Id => a.id().cmp(&b.id()),
            };
            let key = match pagination.sort_order {
                SortOrder::Ascending => key,
                SortOrder::Descending => key.reverse(),
            };
            // Tie-break by id ascending regardless of direction
            key.then_with(|| a.id().cmp(&b.id()))
        });

        admitted
            .into_iter()
            .skip(pagination.page.saturating_sub(1) * pagination.page_size)
            .take(pagination.page_size)
            .cloned()
            .collect()
    }
}

// ============================================================================
// Store bundle
// ============================================================================

/// Store type for each entity family
pub type ProjectStore = EntityStore<Project, ProjectFilter>;
pub type ScanStore = EntityStore<Scan, ScanFilter>;
pub type FindingStore = EntityStore<Finding, FindingFilter>;
pub type InsightStore = EntityStore<AiInsight, InsightFilter>;

/// The full store set, constructed once at application start and threaded
/// through the engine. Never accessed via module-level globals, so tests
/// can instantiate isolated copies.
#[derive(Default)]
pub struct Stores {
    pub projects: ProjectStore,
    pub scans: ScanStore,
    pub findings: FindingStore,
    pub insights: InsightStore,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every collection to empty (session teardown after a 401).
    pub fn clear_all(&self) {
        self.projects.replace_all(Vec::new());
        self.scans.replace_all(Vec::new());
        self.findings.replace_all(Vec::new());
        self.insights.replace_all(Vec::new());
    }
}

// ============================================================================
// Tests
// ============================================================================
