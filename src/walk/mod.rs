//! Filesystem walker and companion-audio discovery (§4.2).

pub mod audio;

use std::path::{Path, PathBuf};

use globset::GlobSet;
use thiserror::Error;
use walkdir::WalkDir;

pub use audio::{discover_audio, AUDIO_EXTENSIONS};

/// A hard error encountered walking the songs root.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WalkError {
    /// A yielded path could not be canonicalized, or escaped the root once
    /// resolved.
    #[error("path escaped songs root: {path}")]
    EscapedRoot {
        /// The offending path, as yielded by the walker.
        path: String,
    },
}

/// A `.tja` file discovered under the songs root, with its path relative to
/// that root already computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Absolute path on disk.
    pub absolute_path: PathBuf,
    /// Path relative to the songs root, using OS-native separators.
    pub relative_path: PathBuf,
}

/// Walks `songs_root` recursively in sorted order, yielding every `.tja`
/// file that is not a symlink, does not match any `ignore_globs` entry, and
/// resolves to a path inside the root.
///
/// # Errors
///
/// Returns [`WalkError::EscapedRoot`] for the first entry whose canonical
/// path falls outside `songs_root` once symlink components are resolved.
pub fn walk_tja_files(
    songs_root: &Path,
    ignore_globs: &GlobSet,
) -> Result<Vec<WalkEntry>, WalkError> {
    let canonical_root = songs_root
        .canonicalize()
        .map_err(|_| WalkError::EscapedRoot {
            path: songs_root.display().to_string(),
        })?;

    let mut entries = Vec::new();
    for entry in WalkDir::new(songs_root)
        .follow_links(false)
        .sort_by_file_name()
    {
        let Ok(entry) = entry else { continue };
        if entry.path_is_symlink() || !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("tja") {
            continue;
        }
        let relative_path = match path.strip_prefix(songs_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => continue,
        };
        if ignore_globs.is_match(&relative_path) {
            continue;
        }

        let canonical = path.canonicalize().map_err(|_| WalkError::EscapedRoot {
            path: path.display().to_string(),
        })?;
        if !canonical.starts_with(&canonical_root) {
            return Err(WalkError::EscapedRoot {
                path: path.display().to_string(),
            });
        }

        entries.push(WalkEntry {
            absolute_path: path.to_path_buf(),
            relative_path,
        });
    }

    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(entries)
}

/// The category id + title derived from a `.tja`'s top-level directory
/// (§6 "Filesystem layout").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    /// Numeric prefix, or `0` when the directory name did not start with
    /// `NN `.
    pub id: u32,
    /// Cleaned title.
    pub title: String,
}

/// Derives the category for a `.tja` given its path relative to the songs
/// root.
#[must_use]
pub fn category_for(relative_path: &Path) -> Category {
    let Some(top) = relative_path.iter().next().and_then(|c| c.to_str()) else {
        return Category {
            id: 0,
            title: "Unsorted".to_string(),
        };
    };

    if let Some((prefix, rest)) = top.split_once(' ') {
        if prefix.len() == 2 && prefix.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(id) = prefix.parse::<u32>() {
                let title = crate::tja::clean::clean_metadata_value(rest);
                let title = if title.is_empty() {
                    "Unsorted".to_string()
                } else {
                    title
                };
                return Category { id, title };
            }
        }
    }

    let title = crate::tja::clean::clean_metadata_value(top);
    let title = if title.is_empty() {
        "Unsorted".to_string()
    } else {
        title
    };
    Category { id: 0, title }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_directory_becomes_a_category() {
        let category = category_for(Path::new("03 Anime/song.tja"));
        assert_eq!(category.id, 3);
        assert_eq!(category.title, "Anime");
    }

    #[test]
    fn unnumbered_directory_is_category_zero() {
        let category = category_for(Path::new("Variety/song.tja"));
        assert_eq!(category.id, 0);
        assert_eq!(category.title, "Variety");
    }

    #[test]
    fn root_level_file_is_unsorted() {
        let category = category_for(Path::new("song.tja"));
        assert_eq!(category.id, 0);
        assert_eq!(category.title, "Unsorted");
    }
}
