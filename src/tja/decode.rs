//! Multi-encoding decoding of raw TJA bytes (§4.1 "Decoding").
//!
//! Attempts are tried in order; the first clean decode wins. `encoding_rs`
//! treats Shift_JIS and Windows-31J (a superset commonly called "CP932")
//! as the same table, so both attempts share one decoder — this still
//! preserves the documented attempt order because neither attempt can
//! succeed where the other would fail.

use encoding_rs::{SHIFT_JIS, UTF_16BE, UTF_16LE};

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Decodes `bytes` into normalized-but-not-yet-cleaned text, trying each
/// encoding in the documented order and falling back to lossy UTF-8.
#[must_use]
pub fn decode(bytes: &[u8]) -> String {
    decode_utf8_bom(bytes)
        .or_else(|| decode_utf16(bytes))
        .or_else(|| decode_utf8_strict(bytes))
        .or_else(|| decode_shift_jis(bytes))
        .or_else(|| decode_latin1(bytes))
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

fn decode_utf8_bom(bytes: &[u8]) -> Option<String> {
    let rest = bytes.strip_prefix(&UTF8_BOM)?;
    std::str::from_utf8(rest).ok().map(str::to_owned)
}

fn decode_utf16(bytes: &[u8]) -> Option<String> {
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        let (text, _, had_errors) = UTF_16LE.decode(rest);
        return (!had_errors).then(|| text.into_owned());
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let (text, _, had_errors) = UTF_16BE.decode(rest);
        return (!had_errors).then(|| text.into_owned());
    }
    None
}

fn decode_utf8_strict(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}

fn decode_shift_jis(bytes: &[u8]) -> Option<String> {
    SHIFT_JIS
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(std::borrow::Cow::into_owned)
}

/// Latin-1 (ISO-8859-1) is the identity mapping from byte value to
/// Unicode scalar value for the whole `0..=255` range, so it never fails.
fn decode_latin1(bytes: &[u8]) -> Option<String> {
    Some(bytes.iter().map(|&b| b as char).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_ascii_as_utf8() {
        assert_eq!(decode(b"TITLE:Hello"), "TITLE:Hello");
    }

    #[test]
    fn strips_utf8_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"TITLE:Hi");
        assert_eq!(decode(&bytes), "TITLE:Hi");
    }

    #[test]
    fn decodes_utf16_le_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "AB".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode(&bytes), "AB");
    }

    #[test]
    fn falls_back_to_latin1_for_high_bytes_invalid_elsewhere() {
        // 0xA4 alone is invalid UTF-8 and, paired with a following byte
        // that breaks Shift_JIS continuation rules, should land on Latin-1.
        let bytes = vec![b'A', 0xA4, 0x20, b'B'];
        let decoded = decode(&bytes);
        assert!(decoded.starts_with('A'));
        assert!(decoded.ends_with('B'));
    }
}
