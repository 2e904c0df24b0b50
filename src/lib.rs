//! A chart-library ingestion engine for TJA rhythm-game charts.
//!
//! This crate walks a directory tree of `.tja` chart files and their
//! companion audio, parses each chart tolerantly (malformed content
//! becomes a recorded issue, never a panic), groups files that describe
//! the same song, and upserts one canonical catalog row per song group
//! into a pluggable document store.
//!
//! # Usage
//!
//! ```no_run
//! use song_ingest::config::Config;
//! use song_ingest::metrics::NoopMetrics;
//! use song_ingest::pipeline::Engine;
//! use song_ingest::store::memory::MemoryStore;
//!
//! let config = Config::new("/var/songs", "/songs");
//! let store = MemoryStore::new();
//! let metrics = NoopMetrics;
//! let engine = Engine::new(config, &store, &store, &store, &store, &store, &metrics);
//! let summary = engine.scan(false).unwrap();
//! println!("{summary:?}");
//! ```
//!
//! # Module map
//!
//! - [`tja`]: decodes and parses one chart file into a [`tja::ParsedTja`].
//! - [`walk`]: walks the songs root and resolves companion audio.
//! - [`record`]: builds one [`record::ImportRecord`] per chart file.
//! - [`groupkey`]: computes the deterministic song-identity key.
//! - [`aggregate`]: merges a group's records into one catalog document.
//! - [`store`]: typed repository traits, plus `memory` and (feature
//!   `sqlite`) `sqlite` backends.
//! - [`upsert`]: per-key-locked, retrying catalog upsert.
//! - [`state`]: clean/dirty diffing against the state store.
//! - [`watcher`]: optional debounced filesystem watch (feature `watch`).
//! - [`pipeline`]: orchestrates all of the above into one scan pass.
//! - [`diagnostics`]: read-only summary of state grouped by song.

#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod aggregate;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod groupkey;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod state;
pub mod store;
pub mod tja;
pub mod upsert;
pub mod walk;
pub mod watcher;

pub use config::Config;
pub use error::{IngestError, Result};
pub use pipeline::{Engine, ScanSummary};
