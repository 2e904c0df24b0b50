//! Group aggregation and catalog document building (§4.4).

use std::collections::BTreeSet;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::record::{ImportIssue, ImportRecord, RecordDiagnostic};
use crate::tja::model::{CanonicalCourse, ChartIssue, ChartSummary, Mode};

fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// One entry in a catalog row's `charts` array: a [`ChartSummary`] plus the
/// path of the record it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartEntry {
    /// The path (relative, posix) of the member record this chart came
    /// from.
    pub tja_path: String,
    /// The chart itself.
    pub summary: ChartSummary,
}

/// The legacy per-difficulty projection (§4.4 step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LegacyEntry {
    /// Star rating.
    pub stars: u8,
    /// Branch flag.
    pub branch: bool,
}

/// Legacy `{easy, normal, hard, oni, ura}` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LegacyCourses {
    /// Easy.
    pub easy: Option<LegacyEntry>,
    /// Normal.
    pub normal: Option<LegacyEntry>,
    /// Hard.
    pub hard: Option<LegacyEntry>,
    /// Oni.
    pub oni: Option<LegacyEntry>,
    /// Ura Oni.
    pub ura: Option<LegacyEntry>,
}

/// A fully aggregated group, ready to become (or refresh) a catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDocument {
    /// The group key this document was aggregated under.
    pub group_key: String,
    /// Canonical title, from the base record.
    pub title: Option<String>,
    /// Canonical Japanese title, from the base record.
    pub title_ja: Option<String>,
    /// Canonical subtitle, from the base record.
    pub subtitle: Option<String>,
    /// Canonical Japanese subtitle, from the base record.
    pub subtitle_ja: Option<String>,
    /// Legacy per-difficulty projection.
    pub legacy: LegacyCourses,
    /// Full chart array, sorted per §4.4 step 5.
    pub charts: Vec<ChartEntry>,
    /// MD5 over sorted per-record `tja_hash` values, pipe-joined.
    pub hash: String,
    /// MD5 over sorted per-record `fingerprint` values, pipe-joined.
    pub fingerprint: String,
    /// Relative paths of every member record, sorted.
    pub paths: Vec<String>,
    /// Audio content hash, if the base record (or any member) resolved one.
    pub audio_hash: Option<String>,
    /// `true` iff `audio_hash` is present.
    pub enabled: bool,
    /// Always `true`: this row is owned by the scanner.
    pub managed_by_scanner: bool,
    /// Count of charts satisfying the validity predicate.
    pub valid_chart_count: usize,
    /// Union of every member record's `import_issues`.
    pub import_issues: BTreeSet<ImportIssue>,
    /// Union of every member record's `diagnostics`.
    pub diagnostics: BTreeSet<RecordDiagnostic>,
    /// Genre, resolved per §4.4 step 8.
    pub genre: String,
}

/// Computes the dedup key for one chart within its group (§4.4 step 2).
fn dedup_key(course: &ChartSummary) -> (CanonicalCourse, Option<String>) {
    match course.mode {
        Mode::Dojo => (
            CanonicalCourse::Dojo,
            Some(
                course
                    .display_course
                    .clone()
                    .unwrap_or_else(|| course.raw_name.clone()),
            ),
        ),
        Mode::Standard if course.canonical == CanonicalCourse::Unknown => {
            (CanonicalCourse::Unknown, Some(course.raw_name.clone()))
        }
        Mode::Standard => (course.canonical, None),
    }
}

/// Scans path components in reverse, then metadata strings, for a cleaned
/// candidate containing "dan" or "kyuu" (§4.4 step 4).
fn compute_display_course(
    path_components: &[String],
    metadata_candidates: &[Option<&str>],
    raw_name: &str,
) -> String {
    for component in path_components.iter().rev() {
        let lower = component.to_lowercase();
        if lower.contains("dan") || lower.contains("kyuu") {
            return component.clone();
        }
    }
    for candidate in metadata_candidates.iter().flatten() {
        let lower = candidate.to_lowercase();
        if lower.contains("dan") || lower.contains("kyuu") {
            return (*candidate).to_string();
        }
    }
    raw_name.to_string()
}

/// One member record plus the path components its `relative_path` splits
/// into, used only for dojo `display_course` inference.
pub struct MemberRecord<'a> {
    /// The import record.
    pub record: &'a ImportRecord,
    /// `relative_path` split on `/`.
    pub path_components: Vec<String>,
}

/// Aggregates a group's member records into a [`GroupDocument`] (§4.4).
///
/// `members` need not be pre-sorted; this function sorts by
/// `relative_path` internally (step 1).
#[must_use]
pub fn aggregate(group_key: &str, members: &mut [MemberRecord<'_>]) -> GroupDocument {
    members.sort_by(|a, b| a.record.relative_path.cmp(&b.record.relative_path));

    let mut entries: Vec<ChartEntry> = Vec::new();
    for member in members.iter() {
        for chart in &member.record.charts {
            let mut summary = chart.clone();
            if summary.mode == Mode::Dojo {
                let metadata_candidates = [
                    member.record.title.as_deref(),
                    member.record.subtitle.as_deref(),
                    member.record.title_ja.as_deref(),
                    member.record.subtitle_ja.as_deref(),
                ];
                summary.display_course = Some(compute_display_course(
                    &member.path_components,
                    &metadata_candidates,
                    &summary.raw_name,
                ));
            }
            entries.push(ChartEntry {
                tja_path: member.record.relative_path.clone(),
                summary,
            });
        }
    }

    entries = dedup_entries(entries);
    entries.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    let legacy = build_legacy(&entries);
    let valid_chart_count = entries.iter().filter(|e| e.summary.is_valid()).count();

    let mut paths: Vec<String> = members
        .iter()
        .map(|m| m.record.relative_path.clone())
        .collect();
    paths.sort();

    let mut sorted_hashes: Vec<&str> = members.iter().map(|m| m.record.tja_hash.as_str()).collect();
    sorted_hashes.sort_unstable();
    let hash = md5_hex(sorted_hashes.join("|").as_bytes());

    let mut sorted_fingerprints: Vec<&str> =
        members.iter().map(|m| m.record.fingerprint.as_str()).collect();
    sorted_fingerprints.sort_unstable();
    let fingerprint = md5_hex(sorted_fingerprints.join("|").as_bytes());

    let mut import_issues = BTreeSet::new();
    let mut diagnostics = BTreeSet::new();
    for member in members.iter() {
        import_issues.extend(member.record.import_issues.iter().cloned());
        diagnostics.extend(member.record.diagnostics.iter().cloned());
    }
    if entries.iter().any(|e| e.summary.issues.contains(&ChartIssue::DuplicateCourse)) {
        import_issues.insert(ImportIssue::DuplicateCourse);
    }

    let base = select_base_record(members);
    let audio_hash = base.and_then(|m| m.record.audio_hash.clone());

    let genre = resolve_genre(base, members);

    GroupDocument {
        group_key: group_key.to_string(),
        title: base.and_then(|m| m.record.title.clone()),
        title_ja: base.and_then(|m| m.record.title_ja.clone()),
        subtitle: base.and_then(|m| m.record.subtitle.clone()),
        subtitle_ja: base.and_then(|m| m.record.subtitle_ja.clone()),
        legacy,
        charts: entries,
        hash,
        fingerprint,
        paths,
        enabled: audio_hash.is_some(),
        audio_hash,
        managed_by_scanner: true,
        valid_chart_count,
        import_issues,
        diagnostics,
        genre,
    }
}

/// Marks colliding entries with `duplicate-course`, then keeps only the
/// first valid entry per dedup key (or the first entry outright if none or
/// all collide as valid) (§4.4 step 3).
fn dedup_entries(mut entries: Vec<ChartEntry>) -> Vec<ChartEntry> {
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            if dedup_key(&entries[i].summary) != dedup_key(&entries[j].summary) {
                continue;
            }
            entries[i].summary.issues.insert(ChartIssue::DuplicateCourse);
            entries[j].summary.issues.insert(ChartIssue::DuplicateCourse);
        }
    }

    let mut kept: Vec<ChartEntry> = Vec::new();
    let mut seen: Vec<(CanonicalCourse, Option<String>)> = Vec::new();
    for entry in entries {
        let key = dedup_key(&entry.summary);
        if let Some(pos) = seen.iter().position(|k| *k == key) {
            if !kept[pos].summary.is_valid() && entry.summary.is_valid() {
                kept[pos] = entry;
            }
        } else {
            seen.push(key);
            kept.push(entry);
        }
    }
    kept
}

/// `(standard-first, canonical-difficulty-rank, course, tja_path)` (§4.4
/// step 5); `tja_path` is the final tiebreaker so ordering is well-defined
/// independent of whatever `dedup_entries` already made unique.
fn sort_key(entry: &ChartEntry) -> (u8, u8, String, String) {
    let dojo_last = u8::from(entry.summary.mode == Mode::Dojo);
    (
        dojo_last,
        entry.summary.canonical.rank(),
        entry.summary.raw_name.clone(),
        entry.tja_path.clone(),
    )
}

fn build_legacy(entries: &[ChartEntry]) -> LegacyCourses {
    let mut legacy = LegacyCourses::default();
    for entry in entries {
        if !entry.summary.canonical.is_standard() {
            continue;
        }
        let value = LegacyEntry {
            stars: entry.summary.stars,
            branch: entry.summary.branch,
        };
        match entry.summary.canonical {
            CanonicalCourse::Easy => legacy.easy = Some(value),
            CanonicalCourse::Normal => legacy.normal = Some(value),
            CanonicalCourse::Hard => legacy.hard = Some(value),
            CanonicalCourse::Oni => legacy.oni = Some(value),
            CanonicalCourse::UraOni => legacy.ura = Some(value),
            CanonicalCourse::Unknown | CanonicalCourse::Dojo => {}
        }
    }
    legacy
}

/// Selects the base record for metadata via `argmax(count_valid_charts,
/// len(charts), has_audio)` (§4.4 step 7).
fn select_base_record<'a, 'b>(members: &'a [MemberRecord<'b>]) -> Option<&'a MemberRecord<'b>> {
    members.iter().max_by_key(|m| {
        let valid = m.record.charts.iter().filter(|c| c.is_valid()).count();
        let total = m.record.charts.len();
        let has_audio = usize::from(m.record.audio_hash.is_some());
        (valid, total, has_audio)
    })
}

fn resolve_genre(base: Option<&MemberRecord<'_>>, members: &[MemberRecord<'_>]) -> String {
    if let Some(genre) = base.and_then(|m| m.record.genre.clone()) {
        if !genre.is_empty() {
            return genre;
        }
    }
    if let Some(member) = members.first() {
        return member.record.category_title.clone();
    }
    "Unsorted".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{build_record, RecordInputs};
    use crate::tja::parser::parse_bytes;
    use crate::walk::Category;
    use std::path::Path;

    fn record(tja: &str, relative_path: &str, audio_hash: Option<&str>) -> ImportRecord {
        let parsed = parse_bytes(tja.as_bytes(), &[]);
        build_record(
            &parsed,
            RecordInputs {
                relative_path: Path::new(relative_path),
                tja_mtime_ns: 0,
                tja_size: tja.len() as u64,
                base_url: "/songs",
                audio_relative_path: audio_hash.map(|_| Path::new("Pack/song.ogg")),
                audio_hash,
                audio_diagnostic: None,
                category: Category {
                    id: 0,
                    title: "Pack".to_string(),
                },
            },
        )
    }

    #[test]
    fn merges_two_difficulties_into_one_group() {
        let easy = record(
            "TITLE:Merge\nWAVE:song.ogg\nCOURSE:Easy\nLEVEL:3\n#START\n1,0\n#END\n",
            "Pack/easy.tja",
            Some("H"),
        );
        let oni = record(
            "TITLE:Merge\nWAVE:song.ogg\nCOURSE:Oni\nLEVEL:7\n#START\n2,0\n#END\n",
            "Pack/oni.tja",
            Some("H"),
        );
        let mut members = vec![
            MemberRecord {
                record: &easy,
                path_components: vec!["Pack".to_string()],
            },
            MemberRecord {
                record: &oni,
                path_components: vec!["Pack".to_string()],
            },
        ];
        let doc = aggregate("audio:H:pack", &mut members);
        assert_eq!(doc.charts.len(), 2);
        assert_eq!(doc.valid_chart_count, 2);
        assert!(doc.enabled);
        assert_eq!(doc.genre, "Pack");
    }

    #[test]
    fn duplicate_oni_keeps_one_valid_entry_and_flags_duplicate() {
        let a = record(
            "TITLE:Song\nWAVE:song.ogg\nCOURSE:Oni\nLEVEL:7\n#START\n1,0\n#END\n",
            "Pack/a.tja",
            Some("H"),
        );
        let b = record(
            "TITLE:Song\nWAVE:song.ogg\nCOURSE:Oni\nLEVEL:7\n#START\n1,0\n#END\n",
            "Pack/b.tja",
            Some("H"),
        );
        let mut members = vec![
            MemberRecord {
                record: &a,
                path_components: vec!["Pack".to_string()],
            },
            MemberRecord {
                record: &b,
                path_components: vec!["Pack".to_string()],
            },
        ];
        let doc = aggregate("audio:H:pack", &mut members);
        assert_eq!(doc.charts.len(), 1);
        assert!(doc.import_issues.contains(&ImportIssue::DuplicateCourse));
    }
}
