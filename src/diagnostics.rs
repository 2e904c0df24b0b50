//! Diagnostics report: groups state rows by `group_key` and summarizes
//! them (§6 "Diagnostics report").

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::Serialize;

use crate::record::{ImportIssue, RecordDiagnostic};
use crate::store::{StateRow, StoreError};

/// Per-group diagnostics summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupDiagnostics {
    /// The group key these records share.
    pub group_key: String,
    /// Total charts across all member records.
    pub total_charts: usize,
    /// Charts satisfying the validity predicate.
    pub valid_charts: usize,
    /// Union of every member's import issues.
    pub issues: BTreeSet<ImportIssue>,
    /// Union of every member's audio-discovery diagnostics.
    pub diagnostics: BTreeSet<RecordDiagnostic>,
    /// Relative paths of every member record.
    pub paths: Vec<String>,
}

/// A full diagnostics report, grouping state rows by `group_key`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsReport {
    /// Per-group summaries, sorted by `group_key`.
    pub groups: Vec<GroupDiagnostics>,
}

/// Builds a [`DiagnosticsReport`] from a flat list of state rows.
///
/// Both the structured ([`DiagnosticsReport`]) and rendered
/// ([`render_text`]) outputs derive from this same aggregation, as
/// required by §6.
#[must_use]
pub fn build_report(rows: &[StateRow]) -> DiagnosticsReport {
    let mut grouped: BTreeMap<&str, Vec<&StateRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.group_key.as_str()).or_default().push(row);
    }

    let mut groups = Vec::with_capacity(grouped.len());
    for (group_key, members) in grouped {
        let mut total_charts = 0;
        let mut valid_charts = 0;
        let mut issues = BTreeSet::new();
        let mut diagnostics = BTreeSet::new();
        let mut paths = Vec::new();

        for row in &members {
            paths.push(row.tja_path.clone());
            let Ok(record) =
                serde_json::from_value::<crate::record::ImportRecord>(row.snapshot.clone())
            else {
                continue;
            };
            total_charts += record.charts.len();
            valid_charts += record.charts.iter().filter(|c| c.is_valid()).count();
            issues.extend(record.import_issues.iter().cloned());
            diagnostics.extend(record.diagnostics.iter().cloned());
        }
        paths.sort();

        groups.push(GroupDiagnostics {
            group_key: group_key.to_string(),
            total_charts,
            valid_charts,
            issues,
            diagnostics,
            paths,
        });
    }

    DiagnosticsReport { groups }
}

/// Renders a [`DiagnosticsReport`] as human-readable text.
#[must_use]
pub fn render_text(report: &DiagnosticsReport) -> String {
    let mut out = String::new();
    for group in &report.groups {
        let _ = writeln!(
            out,
            "{} — {}/{} valid charts, {} path(s)",
            group.group_key,
            group.valid_charts,
            group.total_charts,
            group.paths.len()
        );
        if !group.issues.is_empty() {
            let _ = writeln!(out, "  issues: {:?}", group.issues);
        }
        if !group.diagnostics.is_empty() {
            let _ = writeln!(out, "  diagnostics: {:?}", group.diagnostics);
        }
    }
    out
}

/// Convenience error alias for callers that fetch rows from a
/// [`crate::store::StateStore`] before building a report.
pub type FetchResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(group_key: &str, tja_path: &str) -> StateRow {
        StateRow {
            tja_path: tja_path.to_string(),
            tja_mtime_ns: 0,
            tja_size: 0,
            tja_hash: String::new(),
            audio_path: None,
            audio_mtime_ns: None,
            audio_size: None,
            audio_hash: None,
            fingerprint: String::new(),
            song_id: None,
            group_key: group_key.to_string(),
            snapshot: json!({
                "relative_path": tja_path,
                "relative_dir": "",
                "tja_url": "",
                "dir_url": "",
                "audio_url": null,
                "audio_hash": null,
                "tja_mtime_ns": 0,
                "tja_size": 0,
                "tja_hash": "",
                "fingerprint": "",
                "title_key": null,
                "title": null,
                "title_ja": null,
                "subtitle": null,
                "subtitle_ja": null,
                "genre": null,
                "contains_dojo": false,
                "category_id": 0,
                "category_title": "Unsorted",
                "charts": [],
                "import_issues": [],
                "diagnostics": []
            }),
        }
    }

    #[test]
    fn groups_by_group_key() {
        let rows = vec![row("k1", "a.tja"), row("k1", "b.tja"), row("k2", "c.tja")];
        let report = build_report(&rows);
        assert_eq!(report.groups.len(), 2);
        let k1 = report.groups.iter().find(|g| g.group_key == "k1").unwrap();
        assert_eq!(k1.paths, vec!["a.tja".to_string(), "b.tja".to_string()]);
    }

    #[test]
    fn renders_non_empty_text() {
        let rows = vec![row("k1", "a.tja")];
        let report = build_report(&rows);
        let text = render_text(&report);
        assert!(text.contains("k1"));
    }
}
