//! Per-key-locked, retrying upsert coordinator (§4.5).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::aggregate::GroupDocument;
use crate::metrics::MetricsSink;
use crate::store::{CatalogStore, SeqStore, StoreError, UpsertOutcome};

const MAX_RETRIES: u32 = 3;

/// Guards concurrent upserts to the same `group_key` within one process
/// (§4.5 "Per-key locking"). Cross-process safety is delegated to the
/// backend's unique index on `group_key`.
#[derive(Default)]
pub struct GroupLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GroupLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, group_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("group lock table poisoned");
        locks
            .entry(group_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Allocates monotonic ids for newly-inserted groups, seeded once from
/// `max(seq.value, max(catalog.id))` (§4.5.1).
pub struct IdAllocator {
    next: Mutex<Option<u64>>,
}

impl IdAllocator {
    /// Creates an allocator that seeds lazily on first use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: Mutex::new(None),
        }
    }

    /// Allocates the next id, seeding from the backends on first call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if seeding requires a backend read that
    /// fails.
    pub fn allocate(
        &self,
        catalog: &dyn CatalogStore,
        seq: &dyn SeqStore,
    ) -> Result<u64, StoreError> {
        let mut next = self.next.lock().expect("id allocator mutex poisoned");
        if next.is_none() {
            let seeded = catalog.max_id()?.max(seq.get("songs")?);
            *next = Some(seeded);
        }
        let value = next.expect("seeded above") + 1;
        *next = Some(value);
        Ok(value)
    }

    /// Persists the current high-water mark back to `seq` (called once at
    /// the end of a pass).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub fn persist(&self, seq: &dyn SeqStore) -> Result<(), StoreError> {
        let next = self.next.lock().expect("id allocator mutex poisoned");
        if let Some(value) = *next {
            seq.set("songs", value)?;
        }
        Ok(())
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether [`upsert_group`] created a new catalog row or found one already
/// present under the group key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// A new row was created this call.
    Inserted,
    /// A row already existed under this group key.
    AlreadyPresent,
}

/// Upserts the base document for one group, handling id allocation and
/// transient-conflict retries (§4.5).
///
/// `dirty` indicates at least one member record was reprocessed this pass;
/// the base document is only refreshed when dirty or newly inserted.
///
/// # Errors
///
/// Returns [`StoreError`] if every retry attempt fails, or the final
/// attempt reports a non-transient backend error.
pub fn upsert_group(
    catalog: &dyn CatalogStore,
    seq: &dyn SeqStore,
    locks: &GroupLocks,
    ids: &IdAllocator,
    metrics: &dyn MetricsSink,
    group_key: &str,
    base: &GroupDocument,
    dirty: bool,
) -> Result<UpsertResult, StoreError> {
    let lock = locks.lock_for(group_key);
    let _guard = lock.lock().expect("per-group mutex poisoned");

    let mut attempt = 0;
    let outcome = loop {
        match catalog.upsert_base(group_key, base) {
            Ok(UpsertOutcome::TransientConflict) => {
                attempt += 1;
                metrics.incr("duplicate_key_retries_total", 1);
                if attempt > MAX_RETRIES {
                    return Err(StoreError::Backend(format!(
                        "upsert_base: exhausted retries for {group_key}"
                    )));
                }
                std::thread::sleep(backoff_delay(attempt));
                continue;
            }
            Ok(outcome) => break outcome,
            Err(err) => return Err(err),
        }
    };

    let just_inserted = matches!(outcome, UpsertOutcome::Inserted(_));
    if just_inserted {
        let id = ids.allocate(catalog, seq)?;
        catalog.assign_id_if_absent(group_key, id)?;
        metrics.incr("songs_upserted_total", 1);
    }

    if dirty || just_inserted {
        catalog.refresh(group_key, base)?;
    }

    Ok(if just_inserted {
        UpsertResult::Inserted
    } else {
        UpsertResult::AlreadyPresent
    })
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 50 * (attempt + 1);
    let jitter_ms = u64::from(attempt) * 7 % 23;
    Duration::from_millis(u64::from(base_ms) + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::LegacyCourses;
    use crate::metrics::NoopMetrics;
    use crate::store::memory::MemoryStore;
    use std::collections::BTreeSet;

    fn doc(group_key: &str) -> GroupDocument {
        GroupDocument {
            group_key: group_key.to_string(),
            title: None,
            title_ja: None,
            subtitle: None,
            subtitle_ja: None,
            legacy: LegacyCourses::default(),
            charts: Vec::new(),
            hash: String::new(),
            fingerprint: String::new(),
            paths: Vec::new(),
            audio_hash: None,
            enabled: true,
            managed_by_scanner: true,
            valid_chart_count: 0,
            import_issues: BTreeSet::new(),
            diagnostics: BTreeSet::new(),
            genre: "Unsorted".to_string(),
        }
    }

    #[test]
    fn first_upsert_allocates_an_id() {
        let store = MemoryStore::new();
        let locks = GroupLocks::new();
        let ids = IdAllocator::new();
        let metrics = NoopMetrics;
        upsert_group(&store, &store, &locks, &ids, &metrics, "k", &doc("k"), true).unwrap();
        let row = match store.upsert_base("k", &doc("k")).unwrap() {
            UpsertOutcome::AlreadyPresent(row) => row,
            UpsertOutcome::Inserted(_) | UpsertOutcome::TransientConflict => panic!("expected present"),
        };
        assert_eq!(row.id, Some(1));
    }

    #[test]
    fn repeated_upsert_keeps_the_same_id() {
        let store = MemoryStore::new();
        let locks = GroupLocks::new();
        let ids = IdAllocator::new();
        let metrics = NoopMetrics;
        upsert_group(&store, &store, &locks, &ids, &metrics, "k", &doc("k"), true).unwrap();
        upsert_group(&store, &store, &locks, &ids, &metrics, "k", &doc("k"), false).unwrap();
        let row = match store.upsert_base("k", &doc("k")).unwrap() {
            UpsertOutcome::AlreadyPresent(row) => row,
            UpsertOutcome::Inserted(_) | UpsertOutcome::TransientConflict => panic!("expected present"),
        };
        assert_eq!(row.id, Some(1));
    }
}
