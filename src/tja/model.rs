//! Immutable result types produced by [`super::parser::parse`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A course's canonical difficulty name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CanonicalCourse {
    /// Easy / Kantan.
    Easy,
    /// Normal / Futsuu.
    Normal,
    /// Hard / Muzukashii.
    Hard,
    /// Oni.
    Oni,
    /// Ura Oni.
    UraOni,
    /// A dojo/dan/kyuu trial course.
    Dojo,
    /// A `COURSE:` value that could not be resolved to any of the above.
    Unknown,
}

impl CanonicalCourse {
    /// The rank used to order standard-mode charts within a catalog row
    /// (§4.4 step 5), lowest first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Easy => 0,
            Self::Normal => 1,
            Self::Hard => 2,
            Self::Oni => 3,
            Self::UraOni => 4,
            Self::Unknown => 5,
            Self::Dojo => 6,
        }
    }

    /// Whether this canonical course counts as a "standard" mode chart for
    /// the legacy per-difficulty map.
    #[must_use]
    pub const fn is_standard(self) -> bool {
        !matches!(self, Self::Dojo)
    }
}

/// Whether a course section is a normal difficulty chart or a dojo/dan
/// trial made of multiple song segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// A standard, single-song difficulty chart.
    Standard,
    /// A dojo/dan trial, made of an ordered list of [`DojoSegment`]s.
    Dojo,
}

/// Per-chart issues, recorded rather than raised (§7).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChartIssue {
    /// `LEVEL:` was absent.
    MissingLevel,
    /// `LEVEL:` parsed to a non-integer value.
    LevelNonInteger,
    /// `LEVEL:` was outside `[1, 10]` and was clamped.
    LevelOutOfRange,
    /// `LEVEL:` could not be parsed as a number at all.
    InvalidLevel,
    /// The course had no `#START`/`#END` note content.
    MissingChartContent,
    /// The course's note stream contained zero measures.
    EmptyChart,
    /// `COURSE:` could not be resolved to a canonical name.
    UnknownCourse,
    /// `COURSE:` was purely numeric but outside the `0..=4` mapping.
    UnknownCourseNumeric,
    /// The course was branched but was missing an `N`, `E`, or `M` section.
    InvalidBranchSections,
    /// This entry collided with another entry under the same de-dup key.
    DuplicateCourse,
    /// A dojo course had no segments.
    DojoNoSegments,
}

/// A BPM change recorded within a dojo segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BpmChange {
    /// The measure index (within the segment) the change takes effect at.
    pub measure: u32,
    /// The new BPM value.
    pub value: f64,
}

/// One entry in a dojo course's ordered segment list (§4.1 "Dojo
/// segments").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DojoSegment {
    /// The audio file named by the `WAVE:` in effect when this segment
    /// started.
    pub audio: Option<String>,
    /// The measure index (within the course) this segment starts at.
    pub start_measure: u32,
    /// The measure index (within the course) this segment ends at.
    pub end_measure: u32,
    /// `#BPMCHANGE` events recorded while this segment was active.
    pub bpm_map: Vec<BpmChange>,
    /// `(start, end)` measure ranges bracketed by `#GOGOSTART`/`#GOGOEND`.
    pub gogo_ranges: Vec<(u32, u32)>,
}

impl DojoSegment {
    fn starting_at(audio: Option<String>, start_measure: u32) -> Self {
        Self {
            audio,
            start_measure,
            end_measure: start_measure,
            bpm_map: Vec::new(),
            gogo_ranges: Vec::new(),
        }
    }
}

/// Per-course parsed summary (§3 "Course / Chart summary").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSummary {
    /// The canonical difficulty name.
    pub canonical: CanonicalCourse,
    /// The `COURSE:` value exactly as written (cleaned of control chars).
    pub raw_name: String,
    /// Star rating, clamped to `[1, 10]`.
    pub stars: u8,
    /// Whether the course declared `#BRANCHSTART`.
    pub branch: bool,
    /// Whether the course's sections include `N`, `E`, and `M`.
    pub has_all_branch_sections: bool,
    /// Standard chart or dojo trial.
    pub mode: Mode,
    /// Number of `#START` directives seen.
    pub start_blocks: u32,
    /// Number of `#END` directives seen.
    pub end_blocks: u32,
    /// Number of hit notes (digits `1..6`) in the note stream.
    pub hit_notes: u64,
    /// Number of digits (notes, of any kind) in the note stream.
    pub total_notes: u64,
    /// Number of comma-terminated, non-empty measure tokens.
    pub measures: u64,
    /// Unknown `#`-directives seen while this course was parsing notes.
    pub unknown_directives: u32,
    /// The first measure line encountered, truncated to 120 chars.
    pub preview: Option<String>,
    /// Deduped per-chart issues.
    pub issues: BTreeSet<ChartIssue>,
    /// Dojo segments, populated only when `mode == Mode::Dojo`.
    pub segments: Vec<DojoSegment>,
    /// The display name computed for a dojo course by the aggregator
    /// (§4.4 step 4). `None` until the aggregation pass fills it in.
    pub display_course: Option<String>,
}

impl ChartSummary {
    pub(crate) fn new(canonical: CanonicalCourse, raw_name: String, mode: Mode) -> Self {
        Self {
            canonical,
            raw_name,
            stars: 0,
            branch: false,
            has_all_branch_sections: false,
            mode,
            start_blocks: 0,
            end_blocks: 0,
            hit_notes: 0,
            total_notes: 0,
            measures: 0,
            unknown_directives: 0,
            preview: None,
            issues: BTreeSet::new(),
            segments: Vec::new(),
            display_course: None,
        }
    }

    /// Opens a new dojo segment, closing whichever one is currently open
    /// (if any) at the course's current measure index.
    pub(crate) fn open_segment(&mut self, audio: Option<String>) {
        let start = self.segments.last().map_or(0, |s| s.end_measure);
        self.segments.push(DojoSegment::starting_at(audio, start));
    }

    /// Validity predicate (§4.4 "Chart validity").
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self.mode {
            Mode::Dojo => self.total_notes > 0 && !self.segments.is_empty(),
            Mode::Standard => {
                matches!(
                    self.canonical,
                    CanonicalCourse::Easy
                        | CanonicalCourse::Normal
                        | CanonicalCourse::Hard
                        | CanonicalCourse::Oni
                        | CanonicalCourse::UraOni
                ) && !self.issues.contains(&ChartIssue::MissingChartContent)
                    && !self.issues.contains(&ChartIssue::UnknownCourse)
                    && self.total_notes > 0
                    && self.hit_notes > 0
                    && (!self.branch || self.has_all_branch_sections)
            }
        }
    }
}

/// Cleaned, NFC-normalized metadata fields (§3 "Chart file (TJA)").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// `TITLE:`.
    pub title: Option<String>,
    /// `TITLEJA:`.
    pub title_ja: Option<String>,
    /// `SUBTITLE:`.
    pub subtitle: Option<String>,
    /// `SUBTITLEJA:`.
    pub subtitle_ja: Option<String>,
    /// `OFFSET:`, in seconds.
    pub offset: Option<f64>,
    /// `DEMOSTART:`/`PREVIEW:`, in seconds.
    pub demostart: Option<f64>,
    /// `WAVE:`, the companion audio file name as written.
    pub wave: Option<String>,
    /// `GENRE:`.
    pub genre: Option<String>,
    /// `SONGID:`. Never used for grouping (§4.3).
    pub songid: Option<String>,
}

/// The full result of parsing one TJA file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTja {
    /// Cleaned metadata fields.
    pub metadata: Metadata,
    /// One entry per `COURSE:` section (re-using the same entry when a
    /// canonical course repeats within the file).
    pub courses: Vec<ChartSummary>,
    /// MD5 of the newline-normalized decoded text.
    pub fingerprint: String,
    /// MD5 of the raw file bytes.
    pub byte_fingerprint: String,
    /// Unknown directives encountered anywhere in the file, outside of
    /// branch-related directives (which never count).
    pub unknown_directives: u32,
    /// Whether any course resolved to [`CanonicalCourse::Dojo`].
    pub contains_dojo: bool,
}
