//! Pluggable, debounced filesystem watcher (§4.7).
//!
//! Gated behind the `watch` feature. When the feature is disabled, or the
//! songs root does not exist, [`Watcher::spawn`] returns `Ok(None)` and the
//! engine falls back to running only on explicit triggers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::walk::audio::AUDIO_EXTENSIONS;

/// An error constructing the watcher.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WatcherError {
    /// The underlying platform watcher could not be created.
    #[error("failed to initialize filesystem watcher: {0}")]
    Init(String),
}

/// Whether an extension should schedule a scan: `.tja` or any audio
/// extension (§4.7).
fn is_watched_extension(ext: &str) -> bool {
    ext.eq_ignore_ascii_case("tja") || AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext))
}

/// Returns `true` if a filesystem watcher backend is compiled in.
#[must_use]
pub const fn is_supported() -> bool {
    cfg!(feature = "watch")
}

#[cfg(feature = "watch")]
mod backend {
    use super::{is_watched_extension, WatcherError};
    use std::path::{Path, PathBuf};
    use std::sync::mpsc;
    use std::time::Duration;

    use notify::{RecursiveMode, Watcher as NotifyWatcher};

    /// A running watcher: a platform filesystem watch plus a debounce
    /// thread that collapses bursts of events into a single scan callback.
    pub struct Watcher {
        _inner: notify::RecommendedWatcher,
        _debounce_thread: std::thread::JoinHandle<()>,
        stop: mpsc::Sender<()>,
    }

    impl Watcher {
        /// Starts watching `root` recursively, invoking `on_scan` no more
        /// than once per `debounce` window after the last relevant event.
        ///
        /// Returns `Ok(None)` if `root` does not exist.
        pub fn spawn(
            root: &Path,
            debounce: Duration,
            mut on_scan: impl FnMut() + Send + 'static,
        ) -> Result<Option<Self>, WatcherError> {
            if !root.exists() {
                return Ok(None);
            }

            let (event_tx, event_rx) = mpsc::channel::<()>();
            let (stop_tx, stop_rx) = mpsc::channel::<()>();

            let mut inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let Ok(event) = res else { return };
                if !event.paths.iter().any(path_is_watched) {
                    return;
                }
                let _ = event_tx.send(());
            })
            .map_err(|e| WatcherError::Init(e.to_string()))?;

            inner
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| WatcherError::Init(e.to_string()))?;

            let debounce_thread = std::thread::spawn(move || loop {
                if stop_rx.try_recv().is_ok() {
                    return;
                }
                match event_rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(()) => {
                        // Drain any further events arriving within the
                        // debounce window, then fire once.
                        loop {
                            if stop_rx.try_recv().is_ok() {
                                return;
                            }
                            match event_rx.recv_timeout(debounce) {
                                Ok(()) => continue,
                                Err(mpsc::RecvTimeoutError::Timeout) => break,
                                Err(mpsc::RecvTimeoutError::Disconnected) => return,
                            }
                        }
                        on_scan();
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => return,
                }
            });

            Ok(Some(Self {
                _inner: inner,
                _debounce_thread: debounce_thread,
                stop: stop_tx,
            }))
        }

        /// Cancels the debounce thread (the watcher debouncer is
        /// cancellable even though a scan pass itself is not, §5).
        pub fn stop(&self) {
            let _ = self.stop.send(());
        }
    }

    fn path_is_watched(path: &PathBuf) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(is_watched_extension)
    }
}

#[cfg(feature = "watch")]
pub use backend::Watcher;

/// Stub used when the `watch` feature is disabled: always reports
/// unsupported, never spawns.
#[cfg(not(feature = "watch"))]
pub struct Watcher;

#[cfg(not(feature = "watch"))]
impl Watcher {
    /// Always returns `Ok(None)`: no watcher backend is compiled in.
    ///
    /// # Errors
    ///
    /// Never returns an error; the signature matches the `watch`-enabled
    /// build for caller convenience.
    pub fn spawn(
        _root: &Path,
        _debounce: Duration,
        _on_scan: impl FnMut() + Send + 'static,
    ) -> Result<Option<Self>, WatcherError> {
        Ok(None)
    }

    /// No-op.
    pub fn stop(&self) {}
}

#[cfg(all(test, feature = "watch"))]
mod tests {
    use super::*;

    #[test]
    fn missing_root_yields_no_watcher() {
        let watcher = Watcher::spawn(Path::new("/nonexistent/path/for/tests"), Duration::from_millis(10), || {});
        assert!(matches!(watcher, Ok(None)));
    }

    #[test]
    fn watched_extensions_include_tja_and_audio() {
        assert!(is_watched_extension("tja"));
        assert!(is_watched_extension("OGG"));
        assert!(!is_watched_extension("txt"));
    }
}
