//! Companion-audio discovery for a single chart file (§4.2).

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

/// Audio file extensions recognized as companion audio, in discovery
/// priority order for the "first file alphabetically" fallback.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "ogg", "mp3", "wav", "m4a", "aac", "flac", "opus", "t3u8",
];

/// A diagnostic raised while discovering companion audio. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioDiagnostic {
    /// `WAVE:` named a path that resolves outside the songs root.
    WaveOutsideRoot,
    /// `WAVE:` was present but the named file does not exist.
    WaveMissing,
    /// No companion audio could be found by any rule.
    NoAudio,
}

/// The result of resolving a chart's companion audio.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioResolution {
    /// Path to the resolved audio file, relative to the songs root.
    pub relative_path: Option<PathBuf>,
    /// Diagnostic raised while resolving, if any.
    pub diagnostic: Option<AudioDiagnostic>,
}

/// Content hash and filesystem signature of a resolved audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSignature {
    /// MD5 of the file's bytes.
    pub hash: String,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
    /// Size in bytes.
    pub size: u64,
}

/// Resolves the companion audio for a chart at `tja_dir` (absolute,
/// relative to nothing in particular) given its `wave` field and whether
/// the file contains a dojo course, per the ordered rules of §4.2.
#[must_use]
pub fn discover_audio(
    songs_root: &Path,
    tja_relative_dir: &Path,
    wave: Option<&str>,
    contains_dojo: bool,
) -> AudioResolution {
    if let Some(wave) = wave {
        if let Some(resolved) = resolve_wave_target(songs_root, tja_relative_dir, wave) {
            return resolved;
        }
    }

    if contains_dojo {
        if let Some(path) = find_t3u8(songs_root, tja_relative_dir) {
            return AudioResolution {
                relative_path: Some(path),
                diagnostic: None,
            };
        }
    }

    match find_first_by_extension(songs_root, tja_relative_dir) {
        Some(path) => AudioResolution {
            relative_path: Some(path),
            diagnostic: None,
        },
        None => AudioResolution {
            relative_path: None,
            diagnostic: Some(AudioDiagnostic::NoAudio),
        },
    }
}

fn resolve_wave_target(
    songs_root: &Path,
    tja_relative_dir: &Path,
    wave: &str,
) -> Option<AudioResolution> {
    let candidate_relative = tja_relative_dir.join(wave.replace('\\', "/"));
    let candidate_absolute = songs_root.join(&candidate_relative);

    let Ok(canonical_root) = songs_root.canonicalize() else {
        return None;
    };
    let Ok(canonical_candidate) = candidate_absolute.canonicalize() else {
        return Some(AudioResolution {
            relative_path: None,
            diagnostic: Some(AudioDiagnostic::WaveMissing),
        });
    };

    if !canonical_candidate.starts_with(&canonical_root) {
        return Some(AudioResolution {
            relative_path: None,
            diagnostic: Some(AudioDiagnostic::WaveOutsideRoot),
        });
    }

    if !canonical_candidate.is_file() {
        return Some(AudioResolution {
            relative_path: None,
            diagnostic: Some(AudioDiagnostic::WaveMissing),
        });
    }

    Some(AudioResolution {
        relative_path: Some(candidate_relative),
        diagnostic: None,
    })
}

fn find_t3u8(songs_root: &Path, tja_relative_dir: &Path) -> Option<PathBuf> {
    let hls_dir = tja_relative_dir.join("HLS");
    if let Some(found) = first_matching_extension(songs_root, &hls_dir, &["t3u8"]) {
        return Some(found);
    }
    first_matching_extension(songs_root, tja_relative_dir, &["t3u8"])
}

fn find_first_by_extension(songs_root: &Path, tja_relative_dir: &Path) -> Option<PathBuf> {
    first_matching_extension(songs_root, tja_relative_dir, AUDIO_EXTENSIONS)
}

fn first_matching_extension(
    songs_root: &Path,
    relative_dir: &Path,
    extensions: &[&str],
) -> Option<PathBuf> {
    let absolute_dir = songs_root.join(relative_dir);
    let read_dir = std::fs::read_dir(&absolute_dir).ok()?;

    let mut candidates: Vec<String> = read_dir
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.iter().any(|ext| ext.eq_ignore_ascii_case(e)))
                .unwrap_or(false)
        })
        .collect();

    candidates.sort_by_key(|name| name.to_ascii_lowercase());
    candidates.into_iter().next().map(|name| relative_dir.join(name))
}

/// Computes the content hash and filesystem signature of an audio file at
/// `relative_path` under `songs_root`.
///
/// # Errors
///
/// Propagates the underlying I/O error if the file cannot be read.
pub fn signature_of(songs_root: &Path, relative_path: &Path) -> std::io::Result<AudioSignature> {
    let absolute = songs_root.join(relative_path);
    let bytes = std::fs::read(&absolute)?;
    let metadata = std::fs::metadata(&absolute)?;
    let mtime_ns = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos() as i64);

    let mut hasher = Md5::new();
    hasher.update(&bytes);
    let hash = format!("{:x}", hasher.finalize());

    Ok(AudioSignature {
        hash,
        mtime_ns,
        size: metadata.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn falls_back_to_first_audio_file_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Pack")).unwrap();
        fs::write(dir.path().join("Pack/b.ogg"), b"b").unwrap();
        fs::write(dir.path().join("Pack/a.mp3"), b"a").unwrap();

        let resolution = discover_audio(dir.path(), Path::new("Pack"), None, false);
        assert_eq!(
            resolution.relative_path,
            Some(PathBuf::from("Pack/a.mp3"))
        );
    }

    #[test]
    fn missing_wave_target_is_diagnosed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Pack")).unwrap();

        let resolution = discover_audio(dir.path(), Path::new("Pack"), Some("missing.ogg"), false);
        assert_eq!(resolution.relative_path, None);
        assert_eq!(resolution.diagnostic, Some(AudioDiagnostic::WaveMissing));
    }

    #[test]
    fn no_audio_at_all_is_diagnosed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Pack")).unwrap();

        let resolution = discover_audio(dir.path(), Path::new("Pack"), None, false);
        assert_eq!(resolution.diagnostic, Some(AudioDiagnostic::NoAudio));
    }
}
