//! Minimal CLI entry point: wires a `Config`, `env_logger`, and a
//! concrete store backend around [`song_ingest::Engine`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use song_ingest::config::Config;
use song_ingest::metrics::LoggingMetrics;
use song_ingest::pipeline::Engine;
use song_ingest::store::memory::MemoryStore;
#[cfg(feature = "sqlite")]
use song_ingest::store::sqlite::SqliteStore;

/// Scans a TJA chart tree into a canonical song catalog.
#[derive(Debug, Parser)]
#[command(name = "song-ingest", version, about)]
struct Cli {
    /// Root directory containing `.tja` files.
    #[arg(long)]
    songs_root: PathBuf,

    /// Base URL prefix for constructed chart/audio URLs.
    #[arg(long, default_value = "/songs")]
    base_url: String,

    /// Path to a SQLite database file. Omit to use an in-memory store
    /// that discards its contents on exit.
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a single scan pass.
    Scan {
        /// Ignore clean-skip signatures and reprocess every file.
        #[arg(long)]
        full: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let config = Config::new(cli.songs_root, cli.base_url);
    let metrics = LoggingMetrics::new();

    let Command::Scan { full } = cli.command;

    let summary = match cli.database {
        #[cfg(feature = "sqlite")]
        Some(path) => {
            let store = SqliteStore::open(&path).expect("failed to open sqlite database");
            let engine = Engine::new(config, &store, &store, &store, &store, &store, &metrics);
            engine.scan(full)
        }
        #[cfg(not(feature = "sqlite"))]
        Some(_) => {
            log::warn!("--database was given but the sqlite feature is not compiled in; using memory store");
            let store = MemoryStore::new();
            let engine = Engine::new(config, &store, &store, &store, &store, &store, &metrics);
            engine.scan(full)
        }
        None => {
            let store = MemoryStore::new();
            let engine = Engine::new(config, &store, &store, &store, &store, &store, &metrics);
            engine.scan(full)
        }
    };

    match summary {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary).expect("summary serializes"));
        }
        Err(err) => {
            log::error!("scan failed: {err}");
            std::process::exit(1);
        }
    }
}
