//! `COURSE:` name resolution (§4.1 "Courses").

use std::sync::LazyLock;

use std::collections::HashMap;

use super::model::{CanonicalCourse, ChartIssue, Mode};

/// The outcome of resolving a raw `COURSE:` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseResolution {
    /// The canonical difficulty, or `Unknown`.
    pub canonical: CanonicalCourse,
    /// Standard or dojo mode.
    pub mode: Mode,
    /// An issue raised while resolving, if any.
    pub issue: Option<ChartIssue>,
}

static ALIASES: LazyLock<HashMap<&'static str, CanonicalCourse>> = LazyLock::new(|| {
    use CanonicalCourse::{Easy, Hard, Normal, Oni, UraOni};
    HashMap::from([
        ("EASY", Easy),
        ("KANTAN", Easy),
        ("甘口", Easy),
        ("NORMAL", Normal),
        ("FUTSUU", Normal),
        ("辛口", Normal),
        ("HARD", Hard),
        ("MUZUKASHII", Hard),
        ("ONI", Oni),
        ("EDIT", Oni),
        ("URA", UraOni),
        ("URAONI", UraOni),
        ("EDITURA", UraOni),
    ])
});

/// Taste markers used both directly as an alias and for `Tower` path
/// inference.
const EASY_TASTE_MARKERS: &[&str] = &["AMA", "AMAKUCHI", "甘口"];
const NORMAL_TASTE_MARKERS: &[&str] = &["KARA", "KARAKUCHI", "辛口"];

/// Strips `_`/`-`/whitespace and uppercases, for alias-table lookups.
fn normalize_course_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .collect::<String>()
        .to_uppercase()
}

/// Splits a path component on the separators the spec names for taste
/// marker detection: whitespace, dots, underscores, hyphens, parens,
/// brackets.
fn split_path_tokens(component: &str) -> Vec<String> {
    component
        .split(|c: char| {
            c.is_whitespace() || matches!(c, '.' | '_' | '-' | '(' | ')' | '[' | ']')
        })
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect()
}

fn resolve_tower(path_components: &[String]) -> CourseResolution {
    for component in path_components {
        let tokens = split_path_tokens(component);
        for token in &tokens {
            if EASY_TASTE_MARKERS.contains(&token.as_str()) {
                return CourseResolution {
                    canonical: CanonicalCourse::Easy,
                    mode: Mode::Standard,
                    issue: None,
                };
            }
            if NORMAL_TASTE_MARKERS.contains(&token.as_str()) {
                return CourseResolution {
                    canonical: CanonicalCourse::Normal,
                    mode: Mode::Standard,
                    issue: None,
                };
            }
        }
    }
    CourseResolution {
        canonical: CanonicalCourse::Oni,
        mode: Mode::Standard,
        issue: None,
    }
}

/// Resolves a raw `COURSE:` value to a canonical course, per the ordered
/// rules of §4.1.
///
/// `path_components` are the chart's path components (root-relative),
/// used only for `Tower` taste-marker inference.
#[must_use]
pub fn resolve_course(raw_course: &str, path_components: &[String]) -> CourseResolution {
    let normalized = normalize_course_token(raw_course);

    if let Some(&canonical) = ALIASES.get(normalized.as_str()) {
        return CourseResolution {
            canonical,
            mode: Mode::Standard,
            issue: None,
        };
    }

    match normalized.as_str() {
        "TOWER" => resolve_tower(path_components),
        "DOJO" | "DAN" | "KYUU" => CourseResolution {
            canonical: CanonicalCourse::Dojo,
            mode: Mode::Dojo,
            issue: None,
        },
        _ => resolve_numeric_or_unknown(&normalized),
    }
}

fn resolve_numeric_or_unknown(normalized: &str) -> CourseResolution {
    if !normalized.is_empty() && normalized.chars().all(|c| c.is_ascii_digit()) {
        let canonical = match normalized.parse::<u32>() {
            Ok(0) => Some(CanonicalCourse::Easy),
            Ok(1) => Some(CanonicalCourse::Normal),
            Ok(2) => Some(CanonicalCourse::Hard),
            Ok(3) => Some(CanonicalCourse::Oni),
            Ok(4) => Some(CanonicalCourse::UraOni),
            _ => None,
        };
        return match canonical {
            Some(canonical) => CourseResolution {
                canonical,
                mode: Mode::Standard,
                issue: None,
            },
            None => CourseResolution {
                canonical: CanonicalCourse::Unknown,
                mode: Mode::Standard,
                issue: Some(ChartIssue::UnknownCourseNumeric),
            },
        };
    }
    CourseResolution {
        canonical: CanonicalCourse::Unknown,
        mode: Mode::Standard,
        issue: None,
    }
}
