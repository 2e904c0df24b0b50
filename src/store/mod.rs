//! Repository-pattern storage abstraction (§9 "Design notes": replace
//! dynamic dispatch and duck-typed mongo-isms with typed interfaces).
//!
//! The core of this crate depends only on [`CatalogStore`], [`StateStore`],
//! [`IssueStore`], and [`SeqStore`]; concrete backends live in
//! [`memory`] (always available, used by this crate's own tests) and,
//! behind the `sqlite` feature, [`sqlite`].

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{ChartEntry, GroupDocument};

/// A storage-layer error.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend's driver reported a failure after all retries were
    /// exhausted.
    #[error("store backend failure: {0}")]
    Backend(String),
    /// A row could not be (de)serialized to/from its stored representation.
    #[error("(de)serialization failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A catalog row (§3 "Catalog row"), as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRow {
    /// Monotonic integer id, assigned once at insert and never changed.
    pub id: Option<u64>,
    /// The aggregated document fields (§4.4).
    pub document: GroupDocument,
    /// `enabled` flag, tracked independently of `document.enabled` so a
    /// tombstoned row (audio disappeared from this pass) can be
    /// distinguished from one that was never enabled.
    pub enabled: bool,
}

/// The outcome of [`CatalogStore::upsert_base`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// A new row was created; it has no `id` yet.
    Inserted(CatalogRow),
    /// A row already existed under this `group_key`.
    AlreadyPresent(CatalogRow),
    /// A conflicting concurrent insert was observed; the caller should
    /// retry with backoff (§4.5).
    TransientConflict,
}

/// Typed repository for the `songs` collection.
pub trait CatalogStore: Send + Sync {
    /// Atomically inserts a row for `group_key` if absent, otherwise
    /// returns the existing row, matching the `find_one_and_update`
    /// upsert semantics of §4.5.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn upsert_base(&self, group_key: &str, base: &GroupDocument) -> Result<UpsertOutcome, StoreError>;

    /// Refreshes the full base document (all fields except `id`, `order`,
    /// and `charts`) for an existing row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn refresh(&self, group_key: &str, base: &GroupDocument) -> Result<(), StoreError>;

    /// Assigns `id` to the row at `group_key`, if it does not already have
    /// one (§4.5.1).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn assign_id_if_absent(&self, group_key: &str, id: u64) -> Result<(), StoreError>;

    /// Synchronizes the charts array for `group_key` to exactly the
    /// entries in `charts` (§4.5.2).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn set_charts(&self, group_key: &str, charts: &[ChartEntry]) -> Result<(), StoreError>;

    /// The highest `id` currently stored, or `0` if no row has one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn max_id(&self) -> Result<u64, StoreError>;

    /// Marks every row whose `group_key` is not in `seen` as
    /// `enabled:false`, returning the count of rows whose state actually
    /// transitioned from enabled to disabled (§4.6).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn mark_disabled_except(&self, seen: &BTreeSet<String>) -> Result<u64, StoreError>;

    /// Deletes rows whose `group_key` is not a string (defensive
    /// migration, §4.5 "Refresh"), returning the count deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn delete_invalid_group_keys(&self) -> Result<u64, StoreError>;
}

/// A state row (§3 "State row"), one per `.tja` path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRow {
    /// `.tja` path, relative to the songs root (unique index).
    pub tja_path: String,
    /// `.tja` modification time, nanoseconds since the epoch.
    pub tja_mtime_ns: i64,
    /// `.tja` size in bytes.
    pub tja_size: u64,
    /// MD5 of the raw `.tja` bytes.
    pub tja_hash: String,
    /// Companion audio path, if resolved.
    pub audio_path: Option<String>,
    /// Companion audio modification time, if resolved.
    pub audio_mtime_ns: Option<i64>,
    /// Companion audio size, if resolved.
    pub audio_size: Option<u64>,
    /// Companion audio content hash, if resolved.
    pub audio_hash: Option<String>,
    /// MD5 of the newline-normalized decoded text.
    pub fingerprint: String,
    /// `SONGID:`, retained for diagnostics even though it is never used
    /// for grouping (§4.3).
    pub song_id: Option<String>,
    /// The group key this record belonged to as of the last scan.
    pub group_key: String,
    /// Serialized snapshot of the import record, reused when the file is
    /// clean (§4.6).
    pub snapshot: serde_json::Value,
}

/// Typed repository for the `song_scanner_state` collection.
pub trait StateStore: Send + Sync {
    /// Looks up the state row for `tja_path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn get(&self, tja_path: &str) -> Result<Option<StateRow>, StoreError>;

    /// Inserts or replaces the state row for `row.tja_path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn put(&self, row: StateRow) -> Result<(), StoreError>;

    /// Deletes every state row whose path is not in `seen`, returning the
    /// count deleted (§4.6).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn delete_missing(&self, seen: &BTreeSet<String>) -> Result<u64, StoreError>;
}

/// Typed repository for the `import_issues` collection.
pub trait IssueStore: Send + Sync {
    /// Records `(reason, path, course_raw)`, idempotently (unique index
    /// on the triple).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn record(&self, reason: &str, path: &str, course_raw: &str) -> Result<(), StoreError>;
}

/// Typed repository for the `seq` collection (§4.5.1 "Id allocation").
pub trait SeqStore: Send + Sync {
    /// The current value of the named counter, or `0` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn get(&self, name: &str) -> Result<u64, StoreError>;

    /// Persists `value` as the named counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn set(&self, name: &str, value: u64) -> Result<(), StoreError>;
}

/// Typed repository for the `categories` collection: one row per observed
/// `NN <Title>` directory id, refreshed every pass (supplemented feature,
/// see `original_source/songs_scanner.py`'s category upkeep).
pub trait CategoryStore: Send + Sync {
    /// Upserts the category row for `id`, setting `title` whether the row
    /// is newly created or already existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn upsert(&self, id: u32, title: &str) -> Result<(), StoreError>;

    /// The stored title for `id`, if the category has ever been observed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on a non-transient backend failure.
    fn title_for(&self, id: u32) -> Result<Option<String>, StoreError>;
}
