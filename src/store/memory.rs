//! In-memory store backend, always available (used by this crate's own
//! test suite and by callers that don't need persistence).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use super::{
    CatalogRow, CatalogStore, CategoryStore, IssueStore, SeqStore, StateRow, StateStore,
    StoreError, UpsertOutcome,
};
use crate::aggregate::{ChartEntry, GroupDocument};

/// An in-memory [`CatalogStore`]/[`StateStore`]/[`IssueStore`]/[`SeqStore`]/
/// [`CategoryStore`] backed by `HashMap`s behind a single mutex each.
#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: Mutex<HashMap<String, CatalogRow>>,
    state: Mutex<HashMap<String, StateRow>>,
    issues: Mutex<HashSet<(String, String, String)>>,
    seq: Mutex<HashMap<String, u64>>,
    categories: Mutex<HashMap<u32, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CatalogStore for MemoryStore {
    fn upsert_base(&self, group_key: &str, base: &GroupDocument) -> Result<UpsertOutcome, StoreError> {
        let mut catalog = self
            .catalog
            .lock()
            .map_err(|_| StoreError::Backend("catalog mutex poisoned".to_string()))?;
        if let Some(existing) = catalog.get(group_key) {
            return Ok(UpsertOutcome::AlreadyPresent(existing.clone()));
        }
        let row = CatalogRow {
            id: None,
            document: base.clone(),
            enabled: base.enabled,
        };
        catalog.insert(group_key.to_string(), row.clone());
        Ok(UpsertOutcome::Inserted(row))
    }

    fn refresh(&self, group_key: &str, base: &GroupDocument) -> Result<(), StoreError> {
        let mut catalog = self
            .catalog
            .lock()
            .map_err(|_| StoreError::Backend("catalog mutex poisoned".to_string()))?;
        if let Some(row) = catalog.get_mut(group_key) {
            let id = row.id;
            let charts = row.document.charts.clone();
            row.document = base.clone();
            row.document.charts = charts;
            row.id = id;
            row.enabled = base.enabled;
        }
        Ok(())
    }

    fn assign_id_if_absent(&self, group_key: &str, id: u64) -> Result<(), StoreError> {
        let mut catalog = self
            .catalog
            .lock()
            .map_err(|_| StoreError::Backend("catalog mutex poisoned".to_string()))?;
        if let Some(row) = catalog.get_mut(group_key) {
            if row.id.is_none() {
                row.id = Some(id);
            }
        }
        Ok(())
    }

    fn set_charts(&self, group_key: &str, charts: &[ChartEntry]) -> Result<(), StoreError> {
        let mut catalog = self
            .catalog
            .lock()
            .map_err(|_| StoreError::Backend("catalog mutex poisoned".to_string()))?;
        if let Some(row) = catalog.get_mut(group_key) {
            row.document.charts = charts.to_vec();
        }
        Ok(())
    }

    fn max_id(&self) -> Result<u64, StoreError> {
        let catalog = self
            .catalog
            .lock()
            .map_err(|_| StoreError::Backend("catalog mutex poisoned".to_string()))?;
        Ok(catalog.values().filter_map(|r| r.id).max().unwrap_or(0))
    }

    fn mark_disabled_except(&self, seen: &BTreeSet<String>) -> Result<u64, StoreError> {
        let mut catalog = self
            .catalog
            .lock()
            .map_err(|_| StoreError::Backend("catalog mutex poisoned".to_string()))?;
        let mut transitioned = 0;
        for (group_key, row) in catalog.iter_mut() {
            if seen.contains(group_key) {
                continue;
            }
            if row.enabled {
                row.enabled = false;
                row.document.enabled = false;
                transitioned += 1;
            }
        }
        Ok(transitioned)
    }

    fn delete_invalid_group_keys(&self) -> Result<u64, StoreError> {
        // A `HashMap<String, _>` key is always a string by construction;
        // this backend has nothing to clean up.
        Ok(0)
    }
}

impl StateStore for MemoryStore {
    fn get(&self, tja_path: &str) -> Result<Option<StateRow>, StoreError> {
        let state = self
            .state
            .lock()
            .map_err(|_| StoreError::Backend("state mutex poisoned".to_string()))?;
        Ok(state.get(tja_path).cloned())
    }

    fn put(&self, row: StateRow) -> Result<(), StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Backend("state mutex poisoned".to_string()))?;
        state.insert(row.tja_path.clone(), row);
        Ok(())
    }

    fn delete_missing(&self, seen: &BTreeSet<String>) -> Result<u64, StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Backend("state mutex poisoned".to_string()))?;
        let before = state.len();
        state.retain(|path, _| seen.contains(path));
        Ok((before - state.len()) as u64)
    }
}

impl IssueStore for MemoryStore {
    fn record(&self, reason: &str, path: &str, course_raw: &str) -> Result<(), StoreError> {
        let mut issues = self
            .issues
            .lock()
            .map_err(|_| StoreError::Backend("issues mutex poisoned".to_string()))?;
        issues.insert((reason.to_string(), path.to_string(), course_raw.to_string()));
        Ok(())
    }
}

impl SeqStore for MemoryStore {
    fn get(&self, name: &str) -> Result<u64, StoreError> {
        let seq = self
            .seq
            .lock()
            .map_err(|_| StoreError::Backend("seq mutex poisoned".to_string()))?;
        Ok(seq.get(name).copied().unwrap_or(0))
    }

    fn set(&self, name: &str, value: u64) -> Result<(), StoreError> {
        let mut seq = self
            .seq
            .lock()
            .map_err(|_| StoreError::Backend("seq mutex poisoned".to_string()))?;
        seq.insert(name.to_string(), value);
        Ok(())
    }
}

impl CategoryStore for MemoryStore {
    fn upsert(&self, id: u32, title: &str) -> Result<(), StoreError> {
        let mut categories = self
            .categories
            .lock()
            .map_err(|_| StoreError::Backend("categories mutex poisoned".to_string()))?;
        categories.insert(id, title.to_string());
        Ok(())
    }

    fn title_for(&self, id: u32) -> Result<Option<String>, StoreError> {
        let categories = self
            .categories
            .lock()
            .map_err(|_| StoreError::Backend("categories mutex poisoned".to_string()))?;
        Ok(categories.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::LegacyCourses;
    use std::collections::BTreeSet as Set;

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
            import_issues: Set::new(),
            diagnostics: Set::new(),
            genre: "Unsorted".to_string(),
        }
    }

    #[test]
    fn second_upsert_returns_already_present() {
        let store = MemoryStore::new();
        let first = store.upsert_base("k", &doc("k")).unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));
        let second = store.upsert_base("k", &doc("k")).unwrap();
        assert!(matches!(second, UpsertOutcome::AlreadyPresent(_)));
    }

    #[test]
    fn id_assigned_once_is_never_overwritten() {
        let store = MemoryStore::new();
        store.upsert_base("k", &doc("k")).unwrap();
        store.assign_id_if_absent("k", 1).unwrap();
        store.assign_id_if_absent("k", 2).unwrap();
        let row = match store.upsert_base("k", &doc("k")).unwrap() {
            UpsertOutcome::AlreadyPresent(row) => row,
            UpsertOutcome::Inserted(_) | UpsertOutcome::TransientConflict => panic!("expected present"),
        };
        assert_eq!(row.id, Some(1));
    }

    #[test]
    fn disabling_unseen_rows_counts_transitions_once() {
        let store = MemoryStore::new();
        store.upsert_base("k", &doc("k")).unwrap();
        let seen = Set::new();
        assert_eq!(store.mark_disabled_except(&seen).unwrap(), 1);
        assert_eq!(store.mark_disabled_except(&seen).unwrap(), 0);
    }

    #[test]
    fn category_upsert_refreshes_title_in_place() {
        let store = MemoryStore::new();
        store.upsert(3, "Pop").unwrap();
        assert_eq!(store.title_for(3).unwrap(), Some("Pop".to_string()));
        store.upsert(3, "J-Pop").unwrap();
        assert_eq!(store.title_for(3).unwrap(), Some("J-Pop".to_string()));
        assert_eq!(store.title_for(9).unwrap(), None);
    }
}
