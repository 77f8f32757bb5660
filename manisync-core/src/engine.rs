use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::error::{Result, SyncError};
use crate::hasher::{ContentHasher, FileHasher};
use crate::manifest::{FileEntry, Manifest};
use crate::scanner::DirectoryScanner;
use crate::store::ManifestStore;
use crate::watcher::ChangeWatcher;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Uninitialized = 0,
    Loading = 1,
    Ready = 2,
    Rebuilding = 3,
}

impl EngineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Rebuilding,
            _ => Self::Uninitialized,
        }
    }
}

struct Inner {
    cfg: EngineConfig,
    store: ManifestStore,
    scanner: DirectoryScanner,
    hasher: Arc<dyn FileHasher>,
    /// Held for the whole of any rebuild: scan, publish and persist.
    rebuild: Mutex<()>,
    state: AtomicU8,
    scans: AtomicU64,
}

/// Keeps the published manifest in step with the content root.
///
/// Cheap to clone; all clones drive the same store and rebuild guard.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(cfg: EngineConfig) -> Result<Self> {
        let hasher = ContentHasher::new(cfg.digest, cfg.hash_concurrency);
        Self::with_hasher(cfg, Arc::new(hasher))
    }

    /// Build an engine around a caller-supplied digester.
    pub fn with_hasher(cfg: EngineConfig, hasher: Arc<dyn FileHasher>) -> Result<Self> {
        cfg.validate()?;
        let scanner = DirectoryScanner::new(&cfg, hasher.clone())?;
        let store = ManifestStore::new(cfg.manifest_path());
        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                store,
                scanner,
                hasher,
                rebuild: Mutex::new(()),
                state: AtomicU8::new(EngineState::Uninitialized as u8),
                scans: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.cfg
    }

    pub fn store(&self) -> &ManifestStore {
        &self.inner.store
    }

    pub fn hasher(&self) -> &dyn FileHasher {
        self.inner.hasher.as_ref()
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Directory walks performed since construction.
    pub fn scan_count(&self) -> u64 {
        self.inner.scans.load(Ordering::SeqCst)
    }

    fn set_state(&self, s: EngineState) {
        self.inner.state.store(s as u8, Ordering::SeqCst);
    }

    fn settle_state(&self) {
        let s =
            if self.inner.store.get().is_some() { EngineState::Ready } else { EngineState::Uninitialized };
        self.set_state(s);
    }

    fn lock_rebuild(&self) -> MutexGuard<'_, ()> {
        self.inner.rebuild.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn scan(&self) -> Result<Vec<FileEntry>> {
        self.inner.scans.fetch_add(1, Ordering::SeqCst);
        self.inner.scanner.scan(&self.inner.cfg.content_root)
    }

    /// Published manifest, creating it on first use.
    ///
    /// Concurrent first callers wait on the rebuild guard and all receive the
    /// manifest produced by whichever of them got there first.
    pub fn ensure_exists(&self) -> Result<Arc<Manifest>> {
        if let Some(m) = self.inner.store.get() {
            return Ok(m);
        }
        let _guard = self.lock_rebuild();
        if let Some(m) = self.inner.store.get() {
            return Ok(m);
        }
        self.initialize_locked()
    }

    fn initialize_locked(&self) -> Result<Arc<Manifest>> {
        self.set_state(EngineState::Loading);
        if let Some(mf) = self.inner.store.load_from_disk() {
            let m = self.inner.store.publish(mf);
            self.set_state(EngineState::Ready);
            return Ok(m);
        }

        info!(root = ?self.inner.cfg.content_root, "creating a file manifest");
        let files = match self.scan() {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "manifest creation failed");
                self.settle_state();
                return Err(e);
            }
        };
        let m = self.inner.store.publish(Manifest::new(self.inner.cfg.default_version.clone(), files));
        self.set_state(EngineState::Ready);
        // Memory is authoritative; disk catches up on the next successful rebuild.
        let _ = self.inner.store.persist();
        info!(files = m.files.len(), "manifest created");
        Ok(m)
    }

    /// Like `ensure_exists`, but stop waiting after `timeout`.
    ///
    /// Initialization runs on its own thread and completes even when the
    /// caller gives up, in which case `SyncError::Cancelled` is returned.
    pub fn ensure_exists_within(&self, timeout: Duration) -> Result<Arc<Manifest>> {
        if let Some(m) = self.inner.store.get() {
            return Ok(m);
        }
        let (tx, rx) = mpsc::channel();
        let engine = self.clone();
        std::thread::Builder::new()
            .name("manisync-init".into())
            .spawn(move || {
                let _ = tx.send(engine.ensure_exists());
            })
            .map_err(|e| SyncError::io(&self.inner.cfg.content_root, e))?;
        match rx.recv_timeout(timeout) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "caller stopped waiting for manifest");
                Err(SyncError::Cancelled)
            }
            Err(RecvTimeoutError::Disconnected) => Err(SyncError::Scan {
                root: self.inner.cfg.content_root.clone(),
                source: std::io::Error::other("manifest initialization aborted"),
            }),
        }
    }

    /// Rescan the content root and publish the result, keeping the current version label.
    ///
    /// A failed scan leaves the published manifest untouched. A failed save is
    /// reported but the new manifest stays published.
    pub fn refresh(&self) -> Result<Arc<Manifest>> {
        let _guard = self.lock_rebuild();
        self.set_state(EngineState::Rebuilding);
        info!("refreshing manifest from files");

        let version = self
            .inner
            .store
            .get()
            .map(|m| m.version.clone())
            .or_else(|| self.inner.store.load_from_disk().map(|m| m.version))
            .unwrap_or_else(|| self.inner.cfg.default_version.clone());

        let files = match self.scan() {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "manifest refresh failed");
                self.settle_state();
                return Err(e);
            }
        };
        let m = self.inner.store.publish(Manifest::new(version, files));
        self.set_state(EngineState::Ready);
        self.inner.store.persist()?;
        info!(files = m.files.len(), version = %m.version, "manifest refreshed");
        Ok(m)
    }

    /// Republish the current file list under a new version label.
    pub fn set_version(&self, version: impl Into<String>) -> Result<Arc<Manifest>> {
        let _guard = self.lock_rebuild();
        let current = match self.inner.store.get() {
            Some(m) => m,
            None => self.initialize_locked()?,
        };
        let next = Manifest {
            version: version.into(),
            generated_at: current.generated_at,
            files: current.files.clone(),
        };
        let m = self.inner.store.publish(next);
        self.inner.store.persist()?;
        info!(version = %m.version, "manifest version changed");
        Ok(m)
    }

    /// Watch the content root and refresh after each quiet period.
    pub fn watch(&self) -> ChangeWatcher {
        let engine = self.clone();
        ChangeWatcher::start(&self.inner.cfg, move || match engine.refresh() {
            Ok(_) => info!("file system triggered manifest refresh completed"),
            Err(e) => error!(error = %e, "file system triggered manifest refresh failed"),
        })
    }
}
