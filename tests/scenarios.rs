//! End-to-end scan scenarios, mirroring the concrete examples of the
//! component design document.

use std::fs;
use std::path::Path;

use md5::{Digest, Md5};

use song_ingest::aggregate::{GroupDocument, LegacyCourses};
use song_ingest::config::Config;
use song_ingest::groupkey::{compute, GroupKeyInput};
use song_ingest::metrics::NoopMetrics;
use song_ingest::pipeline::Engine;
use song_ingest::store::memory::MemoryStore;
use song_ingest::store::{CatalogStore, UpsertOutcome};
use song_ingest::tja::model::{CanonicalCourse, ChartIssue, Mode};

fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// A document that is never actually inserted: reading a catalog row back
/// through `upsert_base` relies on the row already existing, so this
/// placeholder's fields are never observed.
fn placeholder_document(group_key: &str) -> GroupDocument {
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
        import_issues: Default::default(),
        diagnostics: Default::default(),
        genre: "Unsorted".to_string(),
    }
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn write_bytes(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn s1_multi_file_merge() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Pack");
    write(
        &root,
        "easy.tja",
        "TITLE:Merge\nWAVE:song.ogg\nCOURSE:Easy\nLEVEL:3\n#START\n1,0\n#END\n",
    );
    write(
        &root,
        "oni.tja",
        "TITLE:Merge\nWAVE:song.ogg\nCOURSE:Oni\nLEVEL:7\n#START\n2,0\n#END\n",
    );
    write_bytes(&root, "song.ogg", b"audio-bytes");

    let store = MemoryStore::new();
    let metrics = NoopMetrics;
    let config = Config::new(dir.path().to_path_buf(), "/songs");
    let engine = Engine::new(config, &store, &store, &store, &store, &store, &metrics);
    let summary = engine.scan(true).unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.found, 2);
}

#[test]
fn s2_tower_taste_markers_split_into_easy_and_normal() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Tower Pack");
    write(
        &root,
        "Tower Ama.tja",
        "TITLE:Climb\nWAVE:tower.ogg\nCOURSE:Tower\nLEVEL:2\n#START\n1,0\n#END\n",
    );
    write(
        &root,
        "Tower Kara.tja",
        "TITLE:Climb\nWAVE:tower.ogg\nCOURSE:Tower\nLEVEL:4\n#START\n2,0\n#END\n",
    );
    write_bytes(&root, "tower.ogg", b"tower-audio");

    let store = MemoryStore::new();
    let metrics = NoopMetrics;
    let config = Config::new(dir.path().to_path_buf(), "/songs");
    let engine = Engine::new(config, &store, &store, &store, &store, &store, &metrics);
    let summary = engine.scan(true).unwrap();

    assert_eq!(summary.inserted, 1);
}

#[test]
fn s4_duplicate_oni_is_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Pack");
    write(
        &root,
        "a.tja",
        "TITLE:Song\nWAVE:song.ogg\nCOURSE:Oni\nLEVEL:7\n#START\n1,0\n#END\n",
    );
    write(
        &root,
        "b.tja",
        "TITLE:Song\nWAVE:song.ogg\nCOURSE:Oni\nLEVEL:7\n#START\n1,0\n#END\n",
    );
    write_bytes(&root, "song.ogg", b"same-audio");

    let store = MemoryStore::new();
    let metrics = NoopMetrics;
    let config = Config::new(dir.path().to_path_buf(), "/songs");
    let engine = Engine::new(config, &store, &store, &store, &store, &store, &metrics);
    let summary = engine.scan(true).unwrap();

    assert_eq!(summary.inserted, 1);
}

#[test]
fn s3_distinct_unknown_courses() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Pack");
    write(
        &root,
        "alpha.tja",
        "TITLE:Custom\nWAVE:song.ogg\nCOURSE:Custom Alpha\nLEVEL:1\n#START\n1,0\n#END\n",
    );
    write(
        &root,
        "beta.tja",
        "TITLE:Custom\nWAVE:song.ogg\nCOURSE:Custom Beta\nLEVEL:1\n#START\n2,0\n#END\n",
    );
    let audio_bytes: &[u8] = b"custom-audio";
    write_bytes(&root, "song.ogg", audio_bytes);

    let store = MemoryStore::new();
    let metrics = NoopMetrics;
    let config = Config::new(dir.path().to_path_buf(), "/songs");
    let engine = Engine::new(config, &store, &store, &store, &store, &store, &metrics);
    let summary = engine.scan(true).unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.found, 2);

    let group_key = compute(GroupKeyInput {
        dir_url_path: None,
        relative_dir: Some("Pack"),
        relative_path: "Pack/alpha.tja",
        audio_hash: Some(&md5_hex(audio_bytes)),
        title: None,
    });
    let row = match store
        .upsert_base(&group_key, &placeholder_document(&group_key))
        .unwrap()
    {
        UpsertOutcome::AlreadyPresent(row) => row,
        other => panic!("expected an existing row, got {other:?}"),
    };

    assert_eq!(row.document.charts.len(), 2);
    assert!(row
        .document
        .charts
        .iter()
        .all(|entry| entry.summary.canonical == CanonicalCourse::Unknown));
    let mut raw_names: Vec<&str> = row
        .document
        .charts
        .iter()
        .map(|entry| entry.summary.raw_name.as_str())
        .collect();
    raw_names.sort_unstable();
    assert_eq!(raw_names, ["Custom Alpha", "Custom Beta"]);
    assert!(row
        .document
        .charts
        .iter()
        .all(|entry| !entry.summary.issues.contains(&ChartIssue::DuplicateCourse)));
}

#[test]
fn s5_dojo_nextsong_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Pack");
    write(
        &root,
        "dan.tja",
        "TITLE:Trial\nCOURSE:Dan\nLEVEL:1\nWAVE:segment1.ogg\n#START\n1110,\n#NEXTSONG\nWAVE:segment2.ogg\n2220,\n#END\n",
    );
    write_bytes(&root, "segment1.ogg", b"segment-one");
    write_bytes(&root, "segment2.ogg", b"segment-two");

    let store = MemoryStore::new();
    let metrics = NoopMetrics;
    let config = Config::new(dir.path().to_path_buf(), "/songs");
    let engine = Engine::new(config, &store, &store, &store, &store, &store, &metrics);
    let summary = engine.scan(true).unwrap();

    assert_eq!(summary.inserted, 1);

    let group_key = compute(GroupKeyInput {
        dir_url_path: None,
        relative_dir: Some("Pack"),
        relative_path: "Pack/dan.tja",
        audio_hash: Some(&md5_hex(b"segment-two")),
        title: None,
    });
    let row = match store
        .upsert_base(&group_key, &placeholder_document(&group_key))
        .unwrap()
    {
        UpsertOutcome::AlreadyPresent(row) => row,
        other => panic!("expected an existing row, got {other:?}"),
    };

    assert_eq!(row.document.charts.len(), 1);
    let dojo = &row.document.charts[0].summary;
    assert_eq!(dojo.mode, Mode::Dojo);
    assert_eq!(dojo.total_notes, 8);
    assert_eq!(dojo.hit_notes, 6);
    assert!(dojo.segments.len() >= 2);
    let first = &dojo.segments[0];
    let last = dojo.segments.last().unwrap();
    assert_eq!(first.audio.as_deref(), Some("segment1.ogg"));
    assert_eq!(first.start_measure, 0);
    assert_eq!(first.end_measure, 1);
    assert_eq!(last.audio.as_deref(), Some("segment2.ogg"));
    assert_eq!(last.start_measure, 1);
    assert_eq!(last.end_measure, 2);
}

#[test]
fn s6_incremental_scan_skips_unchanged_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Pack");
    write(
        &root,
        "easy.tja",
        "TITLE:Merge\nWAVE:song.ogg\nCOURSE:Easy\nLEVEL:3\n#START\n1,0\n#END\n",
    );
    write_bytes(&root, "song.ogg", b"audio-bytes");

    let store = MemoryStore::new();
    let metrics = NoopMetrics;
    let config = Config::new(dir.path().to_path_buf(), "/songs");
    let engine = Engine::new(config, &store, &store, &store, &store, &store, &metrics);

    let first = engine.scan(true).unwrap();
    assert_eq!(first.inserted, 1);

    let second = engine.scan(false).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.skipped, 1);

    // Relocating the companion audio changes its content hash, which
    // changes the group key: the old row is orphaned (and tombstoned) while
    // a new row is inserted under the new key (spec.md S6, second half).
    write_bytes(&root, "song.ogg", b"relocated-bytes");

    let third = engine.scan(false).unwrap();
    assert_eq!(third.inserted, 1);
    assert_eq!(third.disabled, 1);
    assert_eq!(third.skipped, 0);
}
