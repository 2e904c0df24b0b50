//! Clean/dirty diffing against the state store (§4.6).

use std::collections::BTreeSet;

use crate::record::ImportRecord;
use crate::store::{CatalogStore, StateRow, StateStore, StoreError};

/// Signature of a `.tja` (and its companion audio, if any) as observed
/// during the current scan.
#[derive(Debug, Clone, Copy)]
pub struct ObservedSignature<'a> {
    /// Current `.tja` modification time.
    pub tja_mtime_ns: i64,
    /// Current `.tja` size.
    pub tja_size: u64,
    /// Current companion audio modification time, if resolved.
    pub audio_mtime_ns: Option<i64>,
    /// Current companion audio size, if resolved.
    pub audio_size: Option<u64>,
    /// Current companion audio path, if resolved.
    pub audio_path: Option<&'a str>,
}

/// Looks up `tja_path`'s state row and decides whether the file is clean
/// (its stored snapshot can be reused) or must be reprocessed (§4.6).
///
/// Returns `Some(record)` when clean; `None` when the file is dirty (no
/// state row, mismatched signature, `full` requested, or the snapshot
/// failed to deserialize).
///
/// # Errors
///
/// Returns [`StoreError`] if the state store read fails.
pub fn check_clean(
    state_store: &dyn StateStore,
    tja_path: &str,
    full: bool,
    observed: ObservedSignature<'_>,
) -> Result<Option<ImportRecord>, StoreError> {
    if full {
        return Ok(None);
    }
    let Some(row) = state_store.get(tja_path)? else {
        return Ok(None);
    };

    let tja_matches = row.tja_mtime_ns == observed.tja_mtime_ns && row.tja_size == observed.tja_size;
    let audio_matches = row.audio_mtime_ns == observed.audio_mtime_ns
        && row.audio_size == observed.audio_size
        && row.audio_path.as_deref() == observed.audio_path;

    if !tja_matches || !audio_matches {
        return Ok(None);
    }

    match serde_json::from_value::<ImportRecord>(row.snapshot) {
        Ok(record) => Ok(Some(record)),
        Err(_) => Ok(None),
    }
}

/// Builds the state row to persist for a freshly (re)processed file.
#[must_use]
pub fn build_state_row(
    tja_path: &str,
    observed: ObservedSignature<'_>,
    tja_hash: String,
    audio_hash: Option<String>,
    fingerprint: String,
    song_id: Option<String>,
    group_key: String,
    record: &ImportRecord,
) -> Result<StateRow, serde_json::Error> {
    Ok(StateRow {
        tja_path: tja_path.to_string(),
        tja_mtime_ns: observed.tja_mtime_ns,
        tja_size: observed.tja_size,
        tja_hash,
        audio_path: observed.audio_path.map(str::to_string),
        audio_mtime_ns: observed.audio_mtime_ns,
        audio_size: observed.audio_size,
        audio_hash,
        fingerprint,
        song_id,
        group_key,
        snapshot: serde_json::to_value(record)?,
    })
}

/// End-of-pass cleanup: prunes state rows whose path disappeared, and
/// tombstones catalog rows whose group key was not seen this pass (§4.6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassCleanupCounts {
    /// State rows deleted because their path was not seen.
    pub pruned_state_rows: u64,
    /// Catalog rows that transitioned `enabled: true -> false`.
    pub disabled: u64,
}

/// Runs end-of-pass cleanup against both stores.
///
/// # Errors
///
/// Returns [`StoreError`] if either backend operation fails.
pub fn finish_pass(
    state_store: &dyn StateStore,
    catalog_store: &dyn CatalogStore,
    seen_paths: &BTreeSet<String>,
    seen_group_keys: &BTreeSet<String>,
) -> Result<PassCleanupCounts, StoreError> {
    let pruned_state_rows = state_store.delete_missing(seen_paths)?;
    let disabled = catalog_store.mark_disabled_except(seen_group_keys)?;
    Ok(PassCleanupCounts {
        pruned_state_rows,
        disabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{build_record, RecordInputs};
    use crate::store::memory::MemoryStore;
    use crate::tja::parser::parse_bytes;
    use crate::walk::Category;
    use std::path::Path;

    fn sample_record() -> ImportRecord {
        let parsed = parse_bytes(b"TITLE:Merge\nCOURSE:Easy\nLEVEL:3\n#START\n1,0\n#END\n", &[]);
        build_record(
            &parsed,
            RecordInputs {
                relative_path: Path::new("Pack/easy.tja"),
                tja_mtime_ns: 100,
                tja_size: 42,
                base_url: "/songs",
                audio_relative_path: None,
                audio_hash: None,
                audio_diagnostic: None,
                category: Category {
                    id: 0,
                    title: "Pack".to_string(),
                },
            },
        )
    }

    #[test]
    fn unseen_path_is_dirty() {
        let store = MemoryStore::new();
        let observed = ObservedSignature {
            tja_mtime_ns: 100,
            tja_size: 42,
            audio_mtime_ns: None,
            audio_size: None,
            audio_path: None,
        };
        let result = check_clean(&store, "Pack/easy.tja", false, observed).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn matching_signature_is_clean() {
        let store = MemoryStore::new();
        let record = sample_record();
        let observed = ObservedSignature {
            tja_mtime_ns: 100,
            tja_size: 42,
            audio_mtime_ns: None,
            audio_size: None,
            audio_path: None,
        };
        let row = build_state_row(
            "Pack/easy.tja",
            observed,
            "hash".to_string(),
            None,
            "fingerprint".to_string(),
            None,
            "k".to_string(),
            &record,
        )
        .unwrap();
        store.put(row).unwrap();

        let result = check_clean(&store, "Pack/easy.tja", false, observed).unwrap();
        assert_eq!(result, Some(record));
    }

    #[test]
    fn full_pass_always_reprocesses() {
        let store = MemoryStore::new();
        let record = sample_record();
        let observed = ObservedSignature {
            tja_mtime_ns: 100,
            tja_size: 42,
            audio_mtime_ns: None,
            audio_size: None,
            audio_path: None,
        };
        let row = build_state_row(
            "Pack/easy.tja",
            observed,
            "hash".to_string(),
            None,
            "fingerprint".to_string(),
            None,
            "k".to_string(),
            &record,
        )
        .unwrap();
        store.put(row).unwrap();

        let result = check_clean(&store, "Pack/easy.tja", true, observed).unwrap();
        assert!(result.is_none());
    }
}
