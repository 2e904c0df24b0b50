//! Engine configuration.
//!
//! This is the shape of the configuration the engine needs, not a loader:
//! merging TOML files, environment variables, and CLI flags into a
//! [`Config`] is the host binary's job (see `src/bin/song_ingest.rs` for a
//! minimal example). The core only ever receives an already-built `Config`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default debounce delay for the filesystem watcher, in milliseconds.
pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 750;

fn default_ignore_globs() -> Vec<String> {
    vec!["**/.DS_Store".to_string(), "**/Thumbs.db".to_string()]
}

const fn default_watch_debounce_ms() -> u64 {
    DEFAULT_WATCH_DEBOUNCE_MS
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// The songs root directory to walk.
    pub songs_root: PathBuf,
    /// Base URL prefix for `tja_url`/`dir_url`/`audio_url` construction.
    ///
    /// Either absolute (`http(s)://…`) or root-anchored (`/…`).
    pub base_url: String,
    /// Glob patterns (relative to `songs_root`) of paths to ignore.
    #[serde(default = "default_ignore_globs")]
    pub ignore_globs: Vec<String>,
    /// Debounce delay applied by the filesystem watcher.
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
    /// Shared secret the admin trigger authenticates callers against.
    ///
    /// The HTTP layer that checks this is out of scope for this crate; the
    /// field exists so the contract (§6 "Admin trigger") has somewhere to
    /// live in configuration.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Config {
    /// Creates a configuration with the given root and base URL, and the
    /// documented defaults for everything else.
    #[must_use]
    pub fn new(songs_root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            songs_root: songs_root.into(),
            base_url: base_url.into(),
            ignore_globs: default_ignore_globs(),
            watch_debounce_ms: DEFAULT_WATCH_DEBOUNCE_MS,
            admin_token: None,
        }
    }
}
