//! Import records: one per TJA file (§3 "Import record").

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::tja::{ChartSummary, ParsedTja};
use crate::walk::audio::AudioDiagnostic;
use crate::walk::Category;

/// A per-record issue, the union described in §7 ("Per-record issues").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImportIssue {
    /// One of the underlying chart-level issues, carried up unchanged.
    Chart(crate::tja::model::ChartIssue),
    /// No `TITLE:` could be recovered for the record.
    MissingTitle,
    /// No `WAVE:` field was present in any member chart.
    MissingWave,
    /// No companion audio could be resolved.
    MissingAudio,
    /// The file declared zero `COURSE:` sections.
    NoCourses,
    /// The file had courses, but none satisfied the validity predicate.
    NoValidCourse,
    /// Two charts collided under the dedup key (§3 "Group").
    DuplicateCourse,
}

/// A non-fatal diagnostic surfaced by audio discovery (§4.2), kept
/// separate from [`ImportIssue`] because it describes discovery behavior
/// rather than chart content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordDiagnostic {
    /// `WAVE:` named a path outside the songs root.
    WaveOutsideRoot,
    /// `WAVE:` was present but did not resolve to an existing file.
    WaveMissing,
    /// No companion audio was found by any rule.
    NoAudio,
}

impl From<AudioDiagnostic> for RecordDiagnostic {
    fn from(value: AudioDiagnostic) -> Self {
        match value {
            AudioDiagnostic::WaveOutsideRoot => Self::WaveOutsideRoot,
            AudioDiagnostic::WaveMissing => Self::WaveMissing,
            AudioDiagnostic::NoAudio => Self::NoAudio,
        }
    }
}

/// One parsed TJA file and everything derived from it (§3 "Import record").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRecord {
    /// Path relative to the songs root, posix-separated.
    pub relative_path: String,
    /// Parent directory of `relative_path`, posix-separated.
    pub relative_dir: String,
    /// `base_url + relative_path`.
    pub tja_url: String,
    /// `base_url + relative_dir + '/'`.
    pub dir_url: String,
    /// `base_url + <audio relative path>`, if audio was resolved.
    pub audio_url: Option<String>,
    /// MD5 of the companion audio's bytes, if resolved.
    pub audio_hash: Option<String>,
    /// Modification time of the `.tja`, in nanoseconds since the epoch.
    pub tja_mtime_ns: i64,
    /// Size in bytes of the `.tja`.
    pub tja_size: u64,
    /// MD5 of the raw `.tja` bytes.
    pub tja_hash: String,
    /// MD5 of the newline-normalized decoded text.
    pub fingerprint: String,
    /// Normalized title key: metadata-cleaned, casefolded, whitespace
    /// collapsed.
    pub title_key: Option<String>,
    /// `TITLE:`.
    pub title: Option<String>,
    /// `TITLEJA:`.
    pub title_ja: Option<String>,
    /// `SUBTITLE:`.
    pub subtitle: Option<String>,
    /// `SUBTITLEJA:`.
    pub subtitle_ja: Option<String>,
    /// `GENRE:`.
    pub genre: Option<String>,
    /// Whether any member chart resolved to `CanonicalCourse::Dojo`.
    pub contains_dojo: bool,
    /// Category id, derived from the top-level directory.
    pub category_id: u32,
    /// Category title, derived from the top-level directory.
    pub category_title: String,
    /// Parsed course sections.
    pub charts: Vec<ChartSummary>,
    /// Union of chart-level issues and record-level gaps.
    pub import_issues: BTreeSet<ImportIssue>,
    /// Audio-discovery diagnostics.
    pub diagnostics: BTreeSet<RecordDiagnostic>,
}

/// Inputs gathered by the pipeline before an [`ImportRecord`] can be built:
/// the parsed chart plus whatever the walker and audio discovery found.
pub struct RecordInputs<'a> {
    /// Path relative to the songs root (OS-native separators).
    pub relative_path: &'a Path,
    /// `.tja` filesystem signature.
    pub tja_mtime_ns: i64,
    /// `.tja` size in bytes.
    pub tja_size: u64,
    /// Base URL to prefix every constructed URL with.
    pub base_url: &'a str,
    /// Audio relative path, if resolved.
    pub audio_relative_path: Option<&'a Path>,
    /// Audio content hash, if resolved.
    pub audio_hash: Option<&'a str>,
    /// Audio-discovery diagnostic, if any.
    pub audio_diagnostic: Option<AudioDiagnostic>,
    /// Category derived from the walker.
    pub category: Category,
}

fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn join_base_url(base_url: &str, relative: &str) -> String {
    if base_url.ends_with('/') {
        format!("{base_url}{relative}")
    } else {
        format!("{base_url}/{relative}")
    }
}

/// Builds an [`ImportRecord`] from a parsed chart and the inputs gathered
/// around it (§3, §7).
#[must_use]
pub fn build_record(parsed: &ParsedTja, inputs: RecordInputs<'_>) -> ImportRecord {
    let relative_path = to_posix(inputs.relative_path);
    let relative_dir = relative_path
        .rsplit_once('/')
        .map_or_else(String::new, |(dir, _)| dir.to_string());

    let tja_url = join_base_url(inputs.base_url, &relative_path);
    let dir_url = if relative_dir.is_empty() {
        format!("{}/", inputs.base_url.trim_end_matches('/'))
    } else {
        format!("{}/", join_base_url(inputs.base_url, &relative_dir))
    };

    let audio_url = inputs
        .audio_relative_path
        .map(|p| join_base_url(inputs.base_url, &to_posix(p)));

    let title = parsed
        .metadata
        .title
        .clone()
        .or_else(|| parsed.metadata.title_ja.clone());
    let title_key = title
        .as_deref()
        .map(|t| t.to_lowercase())
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "));

    let mut import_issues: BTreeSet<ImportIssue> = BTreeSet::new();
    for chart in &parsed.courses {
        for issue in &chart.issues {
            import_issues.insert(ImportIssue::Chart(issue.clone()));
        }
    }
    if title.is_none() {
        import_issues.insert(ImportIssue::MissingTitle);
    }
    if parsed.metadata.wave.is_none() {
        import_issues.insert(ImportIssue::MissingWave);
    }
    if inputs.audio_hash.is_none() {
        import_issues.insert(ImportIssue::MissingAudio);
    }
    if parsed.courses.is_empty() {
        import_issues.insert(ImportIssue::NoCourses);
    } else if !parsed.courses.iter().any(ChartSummary::is_valid) {
        import_issues.insert(ImportIssue::NoValidCourse);
    }

    let mut diagnostics = BTreeSet::new();
    if let Some(diagnostic) = inputs.audio_diagnostic {
        diagnostics.insert(RecordDiagnostic::from(diagnostic));
    }

    ImportRecord {
        relative_path,
        relative_dir,
        tja_url,
        dir_url,
        audio_url,
        audio_hash: inputs.audio_hash.map(str::to_string),
        tja_mtime_ns: inputs.tja_mtime_ns,
        tja_size: inputs.tja_size,
        tja_hash: parsed.byte_fingerprint.clone(),
        fingerprint: parsed.fingerprint.clone(),
        title_key,
        title,
        title_ja: parsed.metadata.title_ja.clone(),
        subtitle: parsed.metadata.subtitle.clone(),
        subtitle_ja: parsed.metadata.subtitle_ja.clone(),
        genre: parsed.metadata.genre.clone(),
        contains_dojo: parsed.contains_dojo,
        category_id: inputs.category.id,
        category_title: inputs.category.title,
        charts: parsed.courses.clone(),
        import_issues,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tja::parser::parse_bytes;

    #[test]
    fn builds_urls_and_flags_missing_audio() {
        let parsed = parse_bytes(b"TITLE:Merge\nCOURSE:Easy\nLEVEL:3\n#START\n1,0\n#END\n", &[]);
        let record = build_record(
            &parsed,
            RecordInputs {
                relative_path: Path::new("Pack/easy.tja"),
                tja_mtime_ns: 0,
                tja_size: 10,
                base_url: "/songs",
                audio_relative_path: None,
                audio_hash: None,
                audio_diagnostic: Some(AudioDiagnostic::NoAudio),
                category: Category {
                    id: 0,
                    title: "Pack".to_string(),
                },
            },
        );
        assert_eq!(record.tja_url, "/songs/Pack/easy.tja");
        assert_eq!(record.dir_url, "/songs/Pack/");
        assert!(record.import_issues.contains(&ImportIssue::MissingAudio));
        assert!(record.import_issues.contains(&ImportIssue::MissingWave));
        assert!(record.diagnostics.contains(&RecordDiagnostic::NoAudio));
    }

    #[test]
    fn empty_file_has_no_courses_issue() {
        let parsed = parse_bytes(b"TITLE:Empty\n", &[]);
        let record = build_record(
            &parsed,
            RecordInputs {
                relative_path: Path::new("song.tja"),
                tja_mtime_ns: 0,
                tja_size: 0,
                base_url: "/songs",
                audio_relative_path: None,
                audio_hash: None,
                audio_diagnostic: None,
                category: Category {
                    id: 0,
                    title: "Unsorted".to_string(),
                },
            },
        );
        assert!(record.import_issues.contains(&ImportIssue::NoCourses));
    }
}
