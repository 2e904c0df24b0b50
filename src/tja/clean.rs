//! Text normalization shared by the parser and the group-key computer
//! (§4.1 "Metadata cleaning", §4.3).

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static HORIZONTAL_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("static regex"));

/// The Unicode `Zs` (space separator) category, plus U+00A0, as an
/// explicit fixed set (it has 17 members and never grows).
const SPACE_SEPARATORS: &[char] = &[
    '\u{0020}', '\u{00A0}', '\u{1680}', '\u{2000}', '\u{2001}', '\u{2002}', '\u{2003}',
    '\u{2004}', '\u{2005}', '\u{2006}', '\u{2007}', '\u{2008}', '\u{2009}', '\u{200A}',
    '\u{202F}', '\u{205F}', '\u{3000}',
];

/// Zero-width code points named explicitly by the specification.
const ZERO_WIDTH: &[char] = &[
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}', '\u{2060}', '\u{180E}',
];

/// A conservative approximation of Unicode category `Cf` (format
/// characters): bidi controls, soft hyphen, and the variation selectors
/// most likely to appear in dirty chart metadata.
fn is_format_char(c: char) -> bool {
    matches!(c,
        '\u{00AD}'
        | '\u{0600}'..='\u{0605}'
        | '\u{061C}'
        | '\u{06DD}'
        | '\u{070F}'
        | '\u{08E2}'
        | '\u{180E}'
        | '\u{200E}' | '\u{200F}'
        | '\u{202A}'..='\u{202E}'
        | '\u{2066}'..='\u{2069}'
        | '\u{FFF9}'..='\u{FFFB}'
        | '\u{E0001}'
        | '\u{E0020}'..='\u{E007F}'
    )
}

/// Normalizes line endings by right-trimming each line and rejoining with
/// `\n` (§4.1 "Decoding").
#[must_use]
pub fn normalize_newlines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Applies NFC normalization.
#[must_use]
pub fn to_nfc(text: &str) -> String {
    text.nfc().collect()
}

/// Cleans one metadata value: deletes NUL, zero-width code points, and
/// format characters; maps space separators (including NBSP) to ASCII
/// space; collapses runs of horizontal whitespace (§4.1 "Metadata
/// cleaning").
#[must_use]
pub fn clean_metadata_value(value: &str) -> String {
    let mapped: String = value
        .chars()
        .filter(|&c| c != '\0' && !ZERO_WIDTH.contains(&c) && !is_format_char(c))
        .map(|c| if SPACE_SEPARATORS.contains(&c) { ' ' } else { c })
        .collect();
    HORIZONTAL_WHITESPACE
        .replace_all(mapped.trim(), " ")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_zero_width_and_collapses_whitespace() {
        let dirty = "Ta\u{200B}iko  no\tTatsujin\u{00A0}\u{00A0}Plus";
        assert_eq!(clean_metadata_value(dirty), "Taiko no Tatsujin Plus");
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(clean_metadata_value("  Hello  "), "Hello");
    }

    #[test]
    fn normalizes_crlf_newlines() {
        assert_eq!(normalize_newlines("a\r\nb \r\nc"), "a\nb\nc");
    }
}
