use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::manifest::Manifest;

/// True for the persisted manifest and the lock/temp files written next to it.
fn is_manifest_artifact(file_name: &str, manifest_file_name: &str) -> bool {
    match file_name.strip_prefix(manifest_file_name) {
        Some("") | Some(".lock") | Some(".tmp") => true,
        _ => false,
    }
}

/// Recognizes the store's own files by name *and* location.
///
/// A content file that merely shares the manifest's name elsewhere in the
/// tree is not an artifact.
#[derive(Clone, Debug)]
pub struct ManifestArtifacts {
    dir: Option<PathBuf>,
    configured_dir: PathBuf,
    file_name: String,
}

impl ManifestArtifacts {
    pub fn new(data_dir: &Path, manifest_file_name: &str) -> Self {
        Self {
            dir: data_dir.canonicalize().ok(),
            configured_dir: data_dir.to_path_buf(),
            file_name: manifest_file_name.to_string(),
        }
    }

    /// Resolve the data directory again if it has been created since.
    pub fn relocate(&mut self) {
        if self.dir.is_none() {
            self.dir = self.configured_dir.canonicalize().ok();
        }
    }

    /// Always false while the data directory does not exist.
    pub fn contains(&self, path: &Path) -> bool {
        let Some(dir) = &self.dir else {
            return false;
        };
        let named = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| is_manifest_artifact(n, &self.file_name));
        if !named {
            return false;
        }
        let parent = path.parent().and_then(|p| p.canonicalize().ok());
        parent.as_deref() == Some(dir.as_path())
    }
}

struct Published {
    generation: u64,
    manifest: Arc<Manifest>,
}

/// Owner of the published manifest and of its file on disk.
///
/// Readers get `Arc` snapshots; the write lock is only held for the swap.
pub struct ManifestStore {
    path: PathBuf,
    current: RwLock<Option<Published>>,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), current: RwLock::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Option<Arc<Manifest>> {
        self.snapshot().map(|(_, m)| m)
    }

    /// Published manifest together with its publish sequence number.
    pub fn snapshot(&self) -> Option<(u64, Arc<Manifest>)> {
        let guard = self.current.read().unwrap_or_else(|p| p.into_inner());
        guard.as_ref().map(|p| (p.generation, p.manifest.clone()))
    }

    /// Number of publishes so far; 0 before initialization.
    pub fn generation(&self) -> u64 {
        self.snapshot().map(|(g, _)| g).unwrap_or(0)
    }

    pub fn publish(&self, candidate: Manifest) -> Arc<Manifest> {
        let manifest = Arc::new(candidate);
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        let generation = guard.as_ref().map(|p| p.generation).unwrap_or(0) + 1;
        *guard = Some(Published { generation, manifest: manifest.clone() });
        drop(guard);
        debug!(generation, files = manifest.files.len(), "published manifest");
        manifest
    }

    /// Absent file is `Ok(None)`; an unreadable or malformed one is `Err(Load)`.
    pub fn read_persisted(&self) -> Result<Option<Manifest>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::Load { path: self.path.clone(), reason: e.to_string() })
            }
        };
        Manifest::from_json_lenient(&json)
            .map(Some)
            .map_err(|reason| SyncError::Load { path: self.path.clone(), reason })
    }

    pub fn load_from_disk(&self) -> Option<Manifest> {
        match self.read_persisted() {
            Ok(Some(mf)) => {
                info!(path = ?self.path, files = mf.files.len(), "loaded persisted manifest");
                Some(mf)
            }
            Ok(None) => {
                debug!(path = ?self.path, "no persisted manifest");
                None
            }
            Err(e) => {
                warn!(error = %e, "ignoring persisted manifest");
                None
            }
        }
    }

    /// Write the published manifest to disk. A no-op before first publish.
    pub fn persist(&self) -> Result<()> {
        let Some(manifest) = self.get() else {
            return Ok(());
        };
        self.write_atomically(&manifest).map_err(|source| {
            error!(path = ?self.path, error = %source, "failed to save manifest");
            SyncError::Persist { path: self.path.clone(), source }
        })?;
        info!(path = ?self.path, files = manifest.files.len(), "saved manifest");
        Ok(())
    }

    fn write_atomically(&self, manifest: &Manifest) -> std::io::Result<()> {
        let json = manifest.to_json_pretty().map_err(std::io::Error::other)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.sibling("lock"))?;
        FileExt::lock_exclusive(&lock)?;

        let tmp = self.sibling("tmp");
        let written = (|| {
            let mut f = File::create(&tmp)?;
            f.write_all(json.as_bytes())?;
            f.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        let _ = FileExt::unlock(&lock);
        written
    }

    fn sibling(&self, ext: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(ext);
        self.path.with_file_name(name)
    }
}
