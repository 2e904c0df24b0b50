//! Line-oriented tokenizing of a decoded TJA file (§4.1).

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use md5::{Digest, Md5};

use super::clean::{clean_metadata_value, normalize_newlines, to_nfc};
use super::course::resolve_course;
use super::decode::decode;
use super::directive::Directive;
use super::model::{CanonicalCourse, ChartIssue, ChartSummary, Metadata, Mode, ParsedTja};
use super::TjaError;

const PREVIEW_MAX_LEN: usize = 120;

fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Reads and parses a chart file from disk.
///
/// # Errors
///
/// Returns [`TjaError::Io`] only if the file cannot be read; malformed
/// content never produces an `Err` here, only [`ChartIssue`]s.
pub fn parse_file(path: &Path, path_components: &[String]) -> Result<ParsedTja, TjaError> {
    let bytes = std::fs::read(path).map_err(|source| TjaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_bytes(&bytes, path_components))
}

/// Parses already-read bytes. Exposed separately from [`parse_file`] so
/// tests and the state-snapshot diff path can parse in-memory content.
#[must_use]
pub fn parse_bytes(bytes: &[u8], path_components: &[String]) -> ParsedTja {
    let byte_fingerprint = md5_hex(bytes);

    let decoded = decode(bytes);
    let decoded = decoded.strip_prefix('\u{FEFF}').unwrap_or(&decoded);
    let nfc = to_nfc(decoded);
    let normalized_text = normalize_newlines(&nfc);
    let fingerprint = md5_hex(normalized_text.as_bytes());

    let mut state = ParserState::new(path_components);
    for line in normalized_text.split('\n') {
        state.process_line(line);
    }
    state.finish(fingerprint, byte_fingerprint)
}

/// Mutable parsing state, frozen into a [`ParsedTja`] by [`ParserState::finish`].
struct ParserState<'a> {
    path_components: &'a [String],
    metadata: Metadata,
    courses: Vec<ChartSummary>,
    course_index: HashMap<(CanonicalCourse, Option<String>), usize>,
    branch_sections: HashMap<usize, BTreeSet<char>>,
    level_seen: HashMap<usize, bool>,
    current_course: Option<usize>,
    parsing_notes: bool,
    current_wave: Option<String>,
    open_segment: Option<usize>,
    segment_measures_at_open: u64,
    unknown_directives: u32,
    contains_dojo: bool,
}

impl<'a> ParserState<'a> {
    fn new(path_components: &'a [String]) -> Self {
        Self {
            path_components,
            metadata: Metadata::default(),
            courses: Vec::new(),
            course_index: HashMap::new(),
            branch_sections: HashMap::new(),
            level_seen: HashMap::new(),
            current_course: None,
            parsing_notes: false,
            current_wave: None,
            open_segment: None,
            segment_measures_at_open: 0,
            unknown_directives: 0,
            contains_dojo: false,
        }
    }

    fn process_line(&mut self, raw_line: &str) {
        let Some(stripped) = strip_comment(raw_line, self.parsing_notes) else {
            return;
        };
        let trimmed = stripped.trim();
        if trimmed.is_empty() || trimmed == "..." {
            return;
        }
        if !trimmed.is_empty() && trimmed.chars().all(|c| c == ',' || c == ';') {
            return;
        }

        if let Some(rest) = trimmed.strip_prefix('#') {
            self.process_directive(rest);
            return;
        }

        if let Some(colon_idx) = trimmed.find(':') {
            self.process_field(&trimmed[..colon_idx], &trimmed[colon_idx + 1..]);
            return;
        }

        if self.parsing_notes
            && trimmed
                .chars()
                .all(|c| c.is_ascii_digit() || c == ',' || c == ' ' || c == '|')
        {
            self.process_measure_line(trimmed);
        }
    }

    fn process_directive(&mut self, rest: &str) {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or("");
        let args = parts.next().unwrap_or("").trim();
        let directive = Directive::classify(name);

        match directive {
            Directive::Start => {
                if let Some(idx) = self.current_course {
                    self.courses[idx].start_blocks += 1;
                    self.parsing_notes = true;
                    if self.courses[idx].mode == Mode::Dojo {
                        self.open_new_segment(idx);
                    }
                }
            }
            Directive::End => {
                if let Some(idx) = self.current_course {
                    self.courses[idx].end_blocks += 1;
                    self.parsing_notes = false;
                    self.close_open_segment(idx);
                }
            }
            Directive::BranchStart => {
                if let Some(idx) = self.current_course {
                    self.courses[idx].branch = true;
                }
            }
            Directive::BranchN => self.mark_branch_section('N'),
            Directive::BranchE => self.mark_branch_section('E'),
            Directive::BranchM => self.mark_branch_section('M'),
            Directive::BpmChange => {
                if let (Some(idx), Some(seg_idx)) = (self.current_course, self.open_segment) {
                    if let Ok(value) = args.parse::<f64>() {
                        let measure = (self.courses[idx].measures - self.segment_measures_at_open)
                            as u32;
                        self.courses[idx].segments[seg_idx]
                            .bpm_map
                            .push(super::model::BpmChange { measure, value });
                    }
                }
            }
            Directive::GogoStart => {
                if let (Some(idx), Some(seg_idx)) = (self.current_course, self.open_segment) {
                    let measure =
                        (self.courses[idx].measures - self.segment_measures_at_open) as u32;
                    self.courses[idx].segments[seg_idx]
                        .gogo_ranges
                        .push((measure, measure));
                }
            }
            Directive::GogoEnd => {
                if let (Some(idx), Some(seg_idx)) = (self.current_course, self.open_segment) {
                    let measure =
                        (self.courses[idx].measures - self.segment_measures_at_open) as u32;
                    if let Some(last) = self.courses[idx].segments[seg_idx].gogo_ranges.last_mut()
                    {
                        last.1 = measure;
                    }
                }
            }
            Directive::NextSong => {
                if let Some(idx) = self.current_course {
                    if self.courses[idx].mode == Mode::Dojo {
                        self.close_open_segment(idx);
                        self.open_new_segment(idx);
                    }
                }
            }
            Directive::Measure | Directive::Scroll => {}
            Directive::Unknown => {
                if self.parsing_notes && !directive.is_branch_related() {
                    self.unknown_directives += 1;
                    if let Some(idx) = self.current_course {
                        self.courses[idx].unknown_directives += 1;
                    }
                }
            }
        }
    }

    fn open_new_segment(&mut self, course_idx: usize) {
        self.courses[course_idx].open_segment(self.current_wave.clone());
        self.open_segment = Some(self.courses[course_idx].segments.len() - 1);
        self.segment_measures_at_open = self.courses[course_idx].measures;
    }

    fn close_open_segment(&mut self, course_idx: usize) {
        if let Some(seg_idx) = self.open_segment.take() {
            self.courses[course_idx].segments[seg_idx].end_measure =
                self.courses[course_idx].measures;
        }
    }

    fn mark_branch_section(&mut self, section: char) {
        if let Some(idx) = self.current_course {
            self.branch_sections.entry(idx).or_default().insert(section);
        }
    }

    fn process_field(&mut self, key: &str, raw_value: &str) {
        let key = key.trim().to_uppercase();
        let value = clean_metadata_value(raw_value);
        match key.as_str() {
            "TITLE" => self.metadata.title = Some(value),
            "TITLEJA" => self.metadata.title_ja = Some(value),
            "SUBTITLE" => self.metadata.subtitle = Some(value),
            "SUBTITLEJA" => self.metadata.subtitle_ja = Some(value),
            "OFFSET" => self.metadata.offset = value.trim().parse().ok(),
            "DEMOSTART" | "PREVIEW" => self.metadata.demostart = value.trim().parse().ok(),
            "GENRE" => self.metadata.genre = Some(value),
            "SONGID" => self.metadata.songid = Some(value),
            "WAVE" => self.process_wave_field(value),
            "COURSE" => self.process_course_field(&value),
            "LEVEL" => self.process_level_field(&value),
            _ => {}
        }
    }

    fn process_wave_field(&mut self, value: String) {
        if let Some(idx) = self.current_course {
            if self.courses[idx].mode == Mode::Dojo && self.open_segment.is_some() {
                self.close_open_segment(idx);
                self.current_wave = Some(value.clone());
                self.open_new_segment(idx);
            }
        }
        self.current_wave = Some(value.clone());
        self.metadata.wave = Some(value);
    }

    fn process_course_field(&mut self, value: &str) {
        let resolution = resolve_course(value, self.path_components);
        let dedup_key = if resolution.canonical == CanonicalCourse::Unknown {
            (resolution.canonical, Some(value.to_string()))
        } else {
            (resolution.canonical, None)
        };
        let idx = *self.course_index.entry(dedup_key).or_insert_with(|| {
            self.courses
                .push(ChartSummary::new(resolution.canonical, value.to_string(), resolution.mode));
            self.courses.len() - 1
        });
        if let Some(issue) = resolution.issue {
            self.courses[idx].issues.insert(issue);
        }
        if resolution.canonical == CanonicalCourse::Dojo {
            self.contains_dojo = true;
        }
        self.current_course = Some(idx);
        self.open_segment = None;
        self.parsing_notes = false;
    }

    fn process_level_field(&mut self, value: &str) {
        let Some(idx) = self.current_course else {
            return;
        };
        self.level_seen.insert(idx, true);
        match value.trim().parse::<f64>() {
            Ok(raw) => {
                let rounded = raw.round();
                if (rounded - raw).abs() > f64::EPSILON {
                    self.courses[idx].issues.insert(ChartIssue::LevelNonInteger);
                }
                let mut clamped = rounded as i64;
                if clamped < 1 {
                    clamped = 1;
                    self.courses[idx].issues.insert(ChartIssue::LevelOutOfRange);
                } else if clamped > 10 {
                    clamped = 10;
                    self.courses[idx].issues.insert(ChartIssue::LevelOutOfRange);
                }
                self.courses[idx].stars = clamped as u8;
            }
            Err(_) => {
                self.courses[idx].issues.insert(ChartIssue::InvalidLevel);
            }
        }
    }

    fn process_measure_line(&mut self, line: &str) {
        let Some(idx) = self.current_course else {
            return;
        };
        if self.courses[idx].preview.is_none() {
            let truncated: String = line.chars().take(PREVIEW_MAX_LEN).collect();
            self.courses[idx].preview = Some(truncated);
        }

        let ends_with_comma = line.ends_with(',');
        let parts: Vec<&str> = line.split(',').collect();
        let part_count = parts.len();
        for (pos, part) in parts.into_iter().enumerate() {
            let is_last = pos + 1 == part_count;
            let terminated = !is_last || ends_with_comma;
            let digits: String = part.chars().filter(char::is_ascii_digit).collect();
            if digits.is_empty() {
                continue;
            }
            self.courses[idx].total_notes += digits.len() as u64;
            let hits = digits.chars().filter(|c| matches!(c, '1'..='6')).count() as u64;
            self.courses[idx].hit_notes += hits;
            if terminated {
                self.courses[idx].measures += 1;
            }
        }
    }

    fn finish(mut self, fingerprint: String, byte_fingerprint: String) -> ParsedTja {
        for (idx, course) in self.courses.iter_mut().enumerate() {
            let sections = self.branch_sections.get(&idx);
            course.has_all_branch_sections = sections
                .is_some_and(|s| s.contains(&'N') && s.contains(&'E') && s.contains(&'M'));
            if course.branch && !course.has_all_branch_sections {
                course.issues.insert(ChartIssue::InvalidBranchSections);
            }
            if !self.level_seen.contains_key(&idx) {
                course.issues.insert(ChartIssue::MissingLevel);
            }
            if course.start_blocks == 0 || course.end_blocks == 0 {
                course.issues.insert(ChartIssue::MissingChartContent);
            } else if course.measures == 0 {
                course.issues.insert(ChartIssue::EmptyChart);
            }
            if course.canonical == CanonicalCourse::Unknown {
                course.issues.insert(ChartIssue::UnknownCourse);
            }
            if course.mode == Mode::Dojo && course.segments.is_empty() {
                course.issues.insert(ChartIssue::DojoNoSegments);
            }
        }

        ParsedTja {
            metadata: self.metadata,
            courses: self.courses,
            fingerprint,
            byte_fingerprint,
            unknown_directives: self.unknown_directives,
            contains_dojo: self.contains_dojo,
        }
    }
}

/// Strips comments from one line, per §4.1 "Line classification".
/// Returns `None` if the entire line is a comment.
fn strip_comment(line: &str, in_notes: bool) -> Option<String> {
    let trimmed_start = line.trim_start();
    if trimmed_start.starts_with("//") || trimmed_start.starts_with(';') {
        return None;
    }

    let marker = if in_notes {
        find_marker_anywhere(line)
    } else {
        find_marker_after_whitespace(line)
    };

    Some(match marker {
        Some(idx) => line[..idx].to_string(),
        None => line.to_string(),
    })
}

fn find_marker_anywhere(line: &str) -> Option<usize> {
    let semi = line.find(';');
    let slashes = line.find("//");
    [semi, slashes].into_iter().flatten().min()
}

fn find_marker_after_whitespace(line: &str) -> Option<usize> {
    let bytes: Vec<(usize, char)> = line.char_indices().collect();
    for (pos, (idx, ch)) in bytes.iter().enumerate() {
        let preceded_by_whitespace = pos > 0 && bytes[pos - 1].1.is_whitespace();
        if !preceded_by_whitespace {
            continue;
        }
        if *ch == ';' {
            return Some(*idx);
        }
        if *ch == '/' && line[*idx..].starts_with("//") {
            return Some(*idx);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tja::model::CanonicalCourse;

    fn parse(src: &str) -> ParsedTja {
        parse_bytes(src.as_bytes(), &[])
    }

    #[test]
    fn parses_basic_metadata_and_course() {
        let parsed = parse("TITLE:Merge\nWAVE:song.ogg\nCOURSE:Easy\nLEVEL:3\n#START\n1,0\n#END\n");
        assert_eq!(parsed.metadata.title.as_deref(), Some("Merge"));
        assert_eq!(parsed.metadata.wave.as_deref(), Some("song.ogg"));
        assert_eq!(parsed.courses.len(), 1);
        let course = &parsed.courses[0];
        assert_eq!(course.canonical, CanonicalCourse::Easy);
        assert_eq!(course.stars, 3);
        assert_eq!(course.total_notes, 2);
        assert_eq!(course.hit_notes, 1);
        assert_eq!(course.measures, 1);
        assert!(course.is_valid());
    }

    #[test]
    fn preserves_titles_containing_semicolons_outside_notes() {
        let parsed = parse("TITLE:Hello; World\nCOURSE:Oni\nLEVEL:5\n#START\n1\n#END\n");
        assert_eq!(parsed.metadata.title.as_deref(), Some("Hello; World"));
    }

    #[test]
    fn digit_nine_is_preserved_as_non_hit_note() {
        let parsed = parse("COURSE:Oni\nLEVEL:5\n#START\n90001,\n#END\n");
        let course = &parsed.courses[0];
        assert_eq!(course.total_notes, 5);
        assert_eq!(course.hit_notes, 1);
    }

    #[test]
    fn unknown_directive_does_not_disturb_counts() {
        let parsed =
            parse("COURSE:Oni\nLEVEL:5\n#START\n1,\n#WHATEVER foo\n2,\n#END\n");
        let course = &parsed.courses[0];
        assert_eq!(course.measures, 2);
        assert_eq!(course.unknown_directives, 1);
        assert_eq!(parsed.unknown_directives, 1);
    }

    #[test]
    fn branch_directives_never_count_as_unknown() {
        let parsed = parse(
            "COURSE:Oni\nLEVEL:8\n#START\n#BRANCHSTART\n#N\n1,\n#E\n2,\n#M\n3,\n#END\n",
        );
        let course = &parsed.courses[0];
        assert_eq!(course.unknown_directives, 0);
        assert!(course.branch);
        assert!(course.has_all_branch_sections);
    }

    #[test]
    fn dojo_nextsong_splits_into_segments() {
        // #NEXTSONG opens a segment of its own before the following
        // WAVE: line reopens again, so at least 2 segments result; the
        // first and last carry the two named audios (spec.md S5).
        let parsed = parse(
            "COURSE:Dan\nLEVEL:1\nWAVE:segment1.ogg\n#START\n1110,\n#NEXTSONG\nWAVE:segment2.ogg\n2220,\n#END\n",
        );
        let course = &parsed.courses[0];
        assert!(course.segments.len() >= 2);
        let first = &course.segments[0];
        let last = course.segments.last().unwrap();
        assert_eq!(first.audio.as_deref(), Some("segment1.ogg"));
        assert_eq!(first.start_measure, 0);
        assert_eq!(first.end_measure, 1);
        assert_eq!(last.audio.as_deref(), Some("segment2.ogg"));
        assert_eq!(last.start_measure, 1);
        assert_eq!(last.end_measure, 2);
        assert_eq!(course.total_notes, 8);
        assert_eq!(course.hit_notes, 6);
    }

    #[test]
    fn reuses_course_info_when_canonical_repeats() {
        let parsed = parse(
            "COURSE:Oni\nLEVEL:5\n#START\n1,\n#END\nCOURSE:Oni\n#START\n2,\n#END\n",
        );
        assert_eq!(parsed.courses.len(), 1);
        assert_eq!(parsed.courses[0].measures, 2);
    }

    #[test]
    fn distinct_unknown_raw_names_stay_separate() {
        let parsed = parse("COURSE:Custom Alpha\nLEVEL:1\n#START\n1,\n#END\n");
        assert_eq!(parsed.courses[0].raw_name, "Custom Alpha");
    }
}
