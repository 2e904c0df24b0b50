//! Orchestrates a single scan pass: walk, decode/parse, group, aggregate,
//! upsert, and state-diff (§5 "Concurrency & resource model").

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use globset::{Glob, GlobSetBuilder};
use serde::Serialize;

use crate::aggregate::{aggregate, GroupDocument, MemberRecord};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::groupkey::{self, GroupKeyInput};
use crate::metrics::MetricsSink;
use crate::record::{build_record, ImportRecord, RecordInputs};
use crate::state::{build_state_row, check_clean, finish_pass, ObservedSignature};
use crate::store::{CatalogStore, CategoryStore, IssueStore, SeqStore, StateStore};
use crate::tja::parser::parse_file;
use crate::upsert::{upsert_group, GroupLocks, IdAllocator, UpsertResult};
use crate::walk::audio::{discover_audio, signature_of};
use crate::walk::{category_for, walk_tja_files};

/// Summary returned by a scan pass (§6 "Admin trigger").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// `.tja` files discovered.
    pub found: u64,
    /// New catalog rows created.
    pub inserted: u64,
    /// Existing catalog rows refreshed.
    pub updated: u64,
    /// Catalog rows tombstoned this pass.
    pub disabled: u64,
    /// Files skipped because their state signature was clean.
    pub skipped: u64,
    /// Hard errors encountered (file disappeared, path escaped root, …).
    pub errors: u64,
    /// Wall-clock duration of the pass, in seconds.
    pub duration_seconds: f64,
}

/// Everything the pipeline needs to run a pass: the concrete stores, a
/// metrics sink, and per-process coordination state that must survive
/// across passes (§4.5.1, §5).
pub struct Engine<'a> {
    config: Config,
    catalog: &'a dyn CatalogStore,
    state: &'a dyn StateStore,
    issues: &'a dyn IssueStore,
    seq: &'a dyn SeqStore,
    categories: &'a dyn CategoryStore,
    metrics: &'a dyn MetricsSink,
    scan_lock: Mutex<()>,
    group_locks: GroupLocks,
    ids: IdAllocator,
}

impl<'a> Engine<'a> {
    /// Builds an engine over the given config and store implementations.
    pub fn new(
        config: Config,
        catalog: &'a dyn CatalogStore,
        state: &'a dyn StateStore,
        issues: &'a dyn IssueStore,
        seq: &'a dyn SeqStore,
        categories: &'a dyn CategoryStore,
        metrics: &'a dyn MetricsSink,
    ) -> Self {
        Self {
            config,
            catalog,
            state,
            issues,
            seq,
            categories,
            metrics,
            scan_lock: Mutex::new(()),
            group_locks: GroupLocks::new(),
            ids: IdAllocator::new(),
        }
    }

    /// Runs one scan pass. Serializes with any other concurrent call to
    /// `scan` on this engine (§5 "Scheduling model").
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] only for setup failures (ignore-glob
    /// compilation, walk root resolution); per-file problems are recorded
    /// as issues and counted in the returned summary instead.
    pub fn scan(&self, full: bool) -> Result<ScanSummary> {
        let _guard = self.scan_lock.lock().expect("scan lock poisoned");
        let started = Instant::now();
        let mut summary = ScanSummary::default();

        self.catalog.delete_invalid_group_keys()?;

        let mut glob_builder = GlobSetBuilder::new();
        for pattern in &self.config.ignore_globs {
            if let Ok(glob) = Glob::new(pattern) {
                glob_builder.add(glob);
            }
        }
        let ignore_globs = glob_builder
            .build()
            .map_err(|_| IngestError::PathEscapedRoot {
                path: "<ignore glob compilation failed>".to_string(),
            })?;

        let entries = walk_tja_files(&self.config.songs_root, &ignore_globs)?;
        summary.found = entries.len() as u64;

        let mut seen_paths = BTreeSet::new();
        let mut seen_group_keys = BTreeSet::new();
        let mut groups: HashMap<String, Vec<ImportRecord>> = HashMap::new();
        let mut dirty_groups: BTreeSet<String> = BTreeSet::new();
        let mut observed_categories: HashMap<u32, String> = HashMap::new();

        for entry in &entries {
            let relative_posix = entry
                .relative_path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            seen_paths.insert(relative_posix.clone());

            let tja_metadata = match std::fs::metadata(&entry.absolute_path) {
                Ok(m) => m,
                Err(_) => {
                    summary.errors += 1;
                    continue;
                }
            };
            let tja_mtime_ns = tja_metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_nanos() as i64);
            let tja_size = tja_metadata.len();

            let path_components: Vec<String> = entry
                .relative_path
                .iter()
                .map(|c| c.to_string_lossy().to_string())
                .collect();
            let category = category_for(&entry.relative_path);
            observed_categories
                .entry(category.id)
                .or_insert_with(|| category.title.clone());

            let tja_relative_dir = entry.relative_path.parent().unwrap_or(Path::new(""));

            // A first, metadata-only audio probe to build the observed
            // signature for the clean/dirty check; the real parse (which
            // yields `wave`/`contains_dojo`) happens only if dirty.
            let probe_audio = discover_audio(&self.config.songs_root, tja_relative_dir, None, false);
            let probe_signature = probe_audio
                .relative_path
                .as_ref()
                .and_then(|p| signature_of(&self.config.songs_root, p).ok());

            let observed = ObservedSignature {
                tja_mtime_ns,
                tja_size,
                audio_mtime_ns: probe_signature.as_ref().map(|s| s.mtime_ns),
                audio_size: probe_signature.as_ref().map(|s| s.size),
                audio_path: probe_audio
                    .relative_path
                    .as_ref()
                    .and_then(|p| p.to_str()),
            };

            let clean = check_clean(self.state, &relative_posix, full, observed)?;

            let (record, dirty) = if let Some(record) = clean {
                (record, false)
            } else {
                let parsed = match parse_file(&entry.absolute_path, &path_components) {
                    Ok(parsed) => parsed,
                    Err(_) => {
                        summary.errors += 1;
                        continue;
                    }
                };

                let audio = discover_audio(
                    &self.config.songs_root,
                    tja_relative_dir,
                    parsed.metadata.wave.as_deref(),
                    parsed.contains_dojo,
                );
                let audio_signature = audio
                    .relative_path
                    .as_ref()
                    .and_then(|p| signature_of(&self.config.songs_root, p).ok());

                self.metrics.incr("tja_notes_total", parsed.courses.iter().map(|c| c.total_notes).sum());
                if parsed.contains_dojo {
                    self.metrics.incr("tja_dojo_parsed_total", 1);
                }
                self.metrics
                    .incr("tja_unknown_directives_total", u64::from(parsed.unknown_directives));

                let record = build_record(
                    &parsed,
                    RecordInputs {
                        relative_path: &entry.relative_path,
                        tja_mtime_ns,
                        tja_size,
                        base_url: &self.config.base_url,
                        audio_relative_path: audio.relative_path.as_deref(),
                        audio_hash: audio_signature.as_ref().map(|s| s.hash.as_str()),
                        audio_diagnostic: audio.diagnostic,
                        category,
                    },
                );

                let updated_observed = ObservedSignature {
                    tja_mtime_ns,
                    tja_size,
                    audio_mtime_ns: audio_signature.as_ref().map(|s| s.mtime_ns),
                    audio_size: audio_signature.as_ref().map(|s| s.size),
                    audio_path: audio.relative_path.as_ref().and_then(|p| p.to_str()),
                };

                let group_key = groupkey::compute(GroupKeyInput {
                    dir_url_path: None,
                    relative_dir: Some(&record.relative_dir),
                    relative_path: &record.relative_path,
                    audio_hash: record.audio_hash.as_deref(),
                    title: record.title.as_deref(),
                });

                if let Ok(row) = build_state_row(
                    &relative_posix,
                    updated_observed,
                    record.tja_hash.clone(),
                    record.audio_hash.clone(),
                    record.fingerprint.clone(),
                    parsed.metadata.songid.clone(),
                    group_key,
                    &record,
                ) {
                    let _ = self.state.put(row);
                }

                for issue in &record.import_issues {
                    let _ = self
                        .issues
                        .record(&format!("{issue:?}"), &record.relative_path, "");
                }

                (record, true)
            };

            let group_key = groupkey::compute(GroupKeyInput {
                dir_url_path: None,
                relative_dir: Some(&record.relative_dir),
                relative_path: &record.relative_path,
                audio_hash: record.audio_hash.as_deref(),
                title: record.title.as_deref(),
            });

            if dirty {
                dirty_groups.insert(group_key.clone());
            } else {
                summary.skipped += 1;
            }
            groups.entry(group_key).or_default().push(record);
        }

        let mut sorted_group_keys: Vec<&String> = groups.keys().collect();
        sorted_group_keys.sort();

        for group_key in sorted_group_keys {
            let records = &groups[group_key];
            let mut path_components_by_record: Vec<Vec<String>> = records
                .iter()
                .map(|r| r.relative_path.split('/').map(str::to_string).collect())
                .collect();
            let mut members: Vec<MemberRecord<'_>> = records
                .iter()
                .zip(path_components_by_record.drain(..))
                .map(|(record, path_components)| MemberRecord {
                    record,
                    path_components,
                })
                .collect();

            let document: GroupDocument = aggregate(group_key, &mut members);
            seen_group_keys.insert(group_key.clone());

            let dirty = dirty_groups.contains(group_key);
            let result = upsert_group(
                self.catalog,
                self.seq,
                &self.group_locks,
                &self.ids,
                self.metrics,
                group_key,
                &document,
                dirty,
            )?;
            self.catalog.set_charts(group_key, &document.charts)?;
            self.metrics
                .incr("charts_synced_total", document.charts.len() as u64);

            match result {
                UpsertResult::Inserted => summary.inserted += 1,
                UpsertResult::AlreadyPresent if dirty => summary.updated += 1,
                UpsertResult::AlreadyPresent => {}
            }
        }

        self.ids.persist(self.seq)?;

        for (id, title) in &observed_categories {
            self.categories.upsert(*id, title)?;
        }

        let cleanup = finish_pass(self.state, self.catalog, &seen_paths, &seen_group_keys)?;
        summary.disabled = cleanup.disabled;

        summary.duration_seconds = started.elapsed().as_secs_f64();
        Ok(summary)
    }
}
