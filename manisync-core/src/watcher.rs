use globset::GlobSet;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::paths;
use crate::store::ManifestArtifacts;

/// Waits for a first signal, keeps draining until the channel has been quiet
/// for `quiet`, then calls `fire` once. Returns when every sender is gone.
pub fn debounce_loop(rx: Receiver<()>, quiet: Duration, mut fire: impl FnMut()) {
    while rx.recv().is_ok() {
        loop {
            match rx.recv_timeout(quiet) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    fire();
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

/// Spawn `debounce_loop` on its own thread and hand back the signal side.
pub fn spawn_debouncer(
    quiet: Duration,
    fire: impl FnMut() + Send + 'static,
) -> std::io::Result<(Sender<()>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("manisync-debounce".into())
        .spawn(move || debounce_loop(rx, quiet, fire))?;
    Ok((tx, handle))
}

struct EventFilter {
    root: PathBuf,
    artifacts: ManifestArtifacts,
    exclude: GlobSet,
}

impl EventFilter {
    fn wants(&mut self, event: &Event) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }
        if event.paths.is_empty() {
            return true;
        }
        // The data directory may only appear with the first save.
        self.artifacts.relocate();
        event.paths.iter().any(|p| self.wants_path(p))
    }

    fn wants_path(&self, p: &Path) -> bool {
        if self.artifacts.contains(p) {
            return false;
        }
        match paths::relative_to(&self.root, p) {
            Some(rel) => !self.exclude.is_match(paths::to_slash(&rel)),
            None => true,
        }
    }
}

/// Recursive filesystem watch on the content root feeding a debounced trigger.
///
/// Idle (never fires) when the root is missing or the OS watch cannot be set up.
/// Dropping it stops the watch; the debounce thread exits once the event source is gone.
pub struct ChangeWatcher {
    watcher: Option<RecommendedWatcher>,
}

impl ChangeWatcher {
    pub fn start(cfg: &EngineConfig, on_change: impl FnMut() + Send + 'static) -> Self {
        let root = cfg.content_root.clone();
        if !root.is_dir() {
            warn!(root = ?root, "content root does not exist, change watcher idle");
            return Self { watcher: None };
        }
        let exclude = match cfg.exclude_set() {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "change watcher idle");
                return Self { watcher: None };
            }
        };
        // Event paths are reported under the watched path.
        let root = root.canonicalize().unwrap_or(root);
        let mut filter = EventFilter {
            root: root.clone(),
            artifacts: ManifestArtifacts::new(&cfg.data_dir, &cfg.manifest_file_name),
            exclude,
        };

        let (tx, _debounce) = match spawn_debouncer(cfg.debounce(), on_change) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "cannot start debounce thread, change watcher idle");
                return Self { watcher: None };
            }
        };

        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) if filter.wants(&event) => {
                debug!(kind = ?event.kind, paths = ?event.paths, "file system change detected");
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "watch error"),
        };
        let mut watcher = match notify::recommended_watcher(handler) {
            Ok(w) => w,
            Err(e) => {
                warn!(root = ?root, error = %e, "failed to create watcher");
                return Self { watcher: None };
            }
        };
        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            warn!(root = ?root, error = %e, "failed to watch content root");
            return Self { watcher: None };
        }
        info!(root = ?root, debounce_ms = cfg.debounce_ms, "file system watcher started");
        Self { watcher: Some(watcher) }
    }

    pub fn is_active(&self) -> bool {
        self.watcher.is_some()
    }
}
