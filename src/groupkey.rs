//! Deterministic group-key computation (§4.3).

use md5::{Digest, Md5};
use percent_encoding::percent_decode_str;

use crate::tja::clean::{clean_metadata_value, to_nfc};

fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// The URL-decode, NFC, slash-normalize, whitespace-collapse pipeline
/// shared by every group-key input (§4.3 "Normalize helper").
#[must_use]
pub fn normalize(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let nfc = to_nfc(&decoded);
    let slashes = nfc.replace('\\', "/");
    let collapsed = collapse_repeated(&slashes, '/');
    let cleaned = clean_metadata_value(&collapsed);
    cleaned.to_lowercase()
}

/// Strips leading/trailing `/` and collapses internal whitespace, used for
/// folder-token normalization specifically.
fn strip_slashes(value: &str) -> String {
    value.trim_matches('/').to_string()
}

fn collapse_repeated(value: &str, ch: char) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_was_ch = false;
    for c in value.chars() {
        if c == ch {
            if prev_was_ch {
                continue;
            }
            prev_was_ch = true;
        } else {
            prev_was_ch = false;
        }
        out.push(c);
    }
    out
}

/// Computes the folder token described in §4.3.
///
/// `dir_url_path`: the URL path portion of `dir_url`, if the record has one.
/// `relative_dir`: the record's `relative_dir`, used both as a fallback and
/// as the cross-check source.
/// `relative_path`: used to derive a parent directory when both of the
/// above are absent.
#[must_use]
pub fn folder_token(
    dir_url_path: Option<&str>,
    relative_dir: Option<&str>,
    relative_path: &str,
) -> String {
    let primary_source = dir_url_path
        .or(relative_dir)
        .unwrap_or_else(|| parent_of(relative_path));

    let normalized_primary = strip_slashes(&normalize(primary_source));
    let first_segment = normalized_primary
        .split('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("");

    let token = if let Some(relative_dir) = relative_dir {
        let normalized_relative = strip_slashes(&normalize(relative_dir));
        let relative_first = normalized_relative
            .split('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("");

        if relative_first != first_segment
            && !relative_first.is_empty()
            && (normalized_primary.contains(relative_first)
                || normalized_primary.ends_with(relative_first))
        {
            relative_first
        } else {
            first_segment
        }
    } else {
        first_segment
    };

    let replaced = token.replace(':', "_");
    let collapsed: String = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "_root".to_string()
    } else {
        collapsed
    }
}

fn parent_of(relative_path: &str) -> &str {
    relative_path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Inputs to [`compute`], gathered from an import record.
#[derive(Debug, Clone, Copy)]
pub struct GroupKeyInput<'a> {
    /// URL path portion of `dir_url`, if set.
    pub dir_url_path: Option<&'a str>,
    /// The record's `relative_dir`, if known independently of `dir_url`.
    pub relative_dir: Option<&'a str>,
    /// The record's `relative_path`.
    pub relative_path: &'a str,
    /// Audio content hash, if companion audio was found.
    pub audio_hash: Option<&'a str>,
    /// Cleaned, casefolded title, if one was parsed.
    pub title: Option<&'a str>,
}

/// Computes the deterministic group key for an import record (§4.3).
#[must_use]
pub fn compute(input: GroupKeyInput<'_>) -> String {
    let folder_token = folder_token(
        input.dir_url_path,
        input.relative_dir,
        input.relative_path,
    );

    if let Some(hash) = input.audio_hash {
        return format!("audio:{hash}:{folder_token}");
    }

    let normalized_dir = input.relative_dir.map(normalize).unwrap_or_default();
    let normalized_path = normalize(input.relative_path);
    let stable_input = if normalized_dir.is_empty() && normalized_path.is_empty() {
        "__empty__".to_string()
    } else {
        format!("{normalized_dir}/{normalized_path}")
    };
    let salt = md5_hex(stable_input.as_bytes());

    let title_key = input
        .title
        .map(|t| normalize(t))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "untitled".to_string());

    format!("missing:{folder_token}:{title_key}:{salt}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_present_keys_by_hash_and_folder() {
        let key = compute(GroupKeyInput {
            dir_url_path: None,
            relative_dir: Some("Pack"),
            relative_path: "Pack/easy.tja",
            audio_hash: Some("abc123"),
            title: Some("Merge"),
        });
        assert_eq!(key, "audio:abc123:pack");
    }

    #[test]
    fn backslashes_and_percent_encoding_and_case_are_equivalent() {
        let a = compute(GroupKeyInput {
            dir_url_path: None,
            relative_dir: Some("Pack"),
            relative_path: "Pack/easy.tja",
            audio_hash: Some("H"),
            title: None,
        });
        let b = compute(GroupKeyInput {
            dir_url_path: None,
            relative_dir: Some("PACK%20"),
            relative_path: "Pack\\easy.tja",
            audio_hash: Some("H"),
            title: None,
        });
        assert_eq!(a, b);
    }

    #[test]
    fn different_top_level_folders_never_collide() {
        let a = compute(GroupKeyInput {
            dir_url_path: None,
            relative_dir: Some("PackA"),
            relative_path: "PackA/easy.tja",
            audio_hash: Some("H"),
            title: None,
        });
        let b = compute(GroupKeyInput {
            dir_url_path: None,
            relative_dir: Some("PackB"),
            relative_path: "PackB/easy.tja",
            audio_hash: Some("H"),
            title: None,
        });
        assert_ne!(a, b);
    }

    #[test]
    fn missing_audio_falls_back_to_title_and_path_salt() {
        let key = compute(GroupKeyInput {
            dir_url_path: None,
            relative_dir: Some("Pack"),
            relative_path: "Pack/easy.tja",
            audio_hash: None,
            title: Some("Merge"),
        });
        assert!(key.starts_with("missing:pack:merge:"));
    }

    #[test]
    fn empty_folder_defaults_to_root_token() {
        assert_eq!(folder_token(None, None, "song.tja"), "_root");
    }
}
