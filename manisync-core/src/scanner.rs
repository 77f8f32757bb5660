use globset::GlobSet;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{EngineConfig, PathStyle};
use crate::error::{Result, SyncError};
use crate::hasher::FileHasher;
use crate::manifest::FileEntry;
use crate::paths;
use crate::progress::{ScanProgress, ScanStats};
use crate::store::ManifestArtifacts;

/// Walks a content root and describes every regular file in it.
pub struct DirectoryScanner {
    hasher: Arc<dyn FileHasher>,
    base_url: String,
    data_dir: PathBuf,
    manifest_file_name: String,
    path_style: PathStyle,
    exclude: GlobSet,
}

impl DirectoryScanner {
    pub fn new(cfg: &EngineConfig, hasher: Arc<dyn FileHasher>) -> Result<Self> {
        Ok(Self {
            hasher,
            base_url: cfg.base_url().to_string(),
            data_dir: cfg.data_dir.clone(),
            manifest_file_name: cfg.manifest_file_name.clone(),
            path_style: cfg.path_style,
            exclude: cfg.exclude_set()?,
        })
    }

    pub fn scan(&self, root: &Path) -> Result<Vec<FileEntry>> {
        self.scan_with_stats(root).map(|(files, _)| files)
    }

    /// Files of each directory come first (by name), then its subdirectories.
    ///
    /// Unreadable or vanished files are logged and left out, as are names that
    /// cannot be rendered without ambiguity. Only a missing or unlistable root
    /// fails the scan. No two entries share a `path`.
    pub fn scan_with_stats(&self, root: &Path) -> Result<(Vec<FileEntry>, ScanStats)> {
        let meta = std::fs::metadata(root)
            .map_err(|source| SyncError::Scan { root: root.to_path_buf(), source })?;
        if !meta.is_dir() {
            return Err(SyncError::Scan {
                root: root.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        let candidates = self.collect_candidates(root)?;
        let progress = ScanProgress::new();
        let described: Vec<Option<FileEntry>> =
            candidates.par_iter().map(|(abs, rel)| self.describe(abs, rel, &progress)).collect();

        let mut seen = HashSet::new();
        let mut files = Vec::with_capacity(described.len());
        for entry in described.into_iter().flatten() {
            if seen.insert(entry.path.clone()) {
                files.push(entry);
            } else {
                progress.file_skipped();
                warn!(path = %entry.path, "skipping file whose path is already listed");
            }
        }

        let stats = progress.finish();
        info!(
            root = ?root,
            files = stats.files_hashed,
            skipped = stats.files_skipped,
            bytes = stats.bytes_hashed,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "scan finished"
        );
        Ok((files, stats))
    }

    fn collect_candidates(&self, root: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
        let artifacts = ManifestArtifacts::new(&self.data_dir, &self.manifest_file_name);
        let walker = WalkDir::new(root).min_depth(1).follow_links(false).sort_by(|a, b| {
            (a.file_type().is_dir(), a.file_name()).cmp(&(b.file_type().is_dir(), b.file_name()))
        });

        let mut out = Vec::new();
        let mut it = walker.into_iter();
        while let Some(next) = it.next() {
            let ent = match next {
                Ok(ent) => ent,
                Err(e) if e.depth() == 0 => {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk failed at root"));
                    return Err(SyncError::Scan { root: root.to_path_buf(), source });
                }
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let Some(rel) = paths::relative_to(root, ent.path()) else {
                continue;
            };
            let ft = ent.file_type();
            if let Some(name) = paths::unrepresentable(&rel) {
                if ft.is_dir() {
                    it.skip_current_dir();
                }
                warn!(path = ?rel, name = ?name, "skipping entry with an ambiguous name");
                continue;
            }
            if self.exclude.is_match(paths::to_slash(&rel)) {
                if ft.is_dir() {
                    it.skip_current_dir();
                }
                debug!(path = ?rel, "excluded");
                continue;
            }
            if !ft.is_file() {
                continue;
            }
            if artifacts.contains(ent.path()) {
                debug!(path = ?rel, "skipping manifest store file");
                continue;
            }
            out.push((ent.into_path(), rel));
        }
        Ok(out)
    }

    fn describe(&self, abs: &Path, rel: &Path, progress: &ScanProgress) -> Option<FileEntry> {
        match self.hasher.hash_sized(abs) {
            Ok((hash, size)) => {
                progress.file_hashed(size);
                debug!(path = ?rel, size, "manifest entry");
                Some(FileEntry {
                    path: paths::render(rel, self.path_style),
                    size,
                    hash,
                    url: paths::join_url(&self.base_url, rel),
                })
            }
            Err(e) => {
                progress.file_skipped();
                warn!(error = %e, "skipping file");
                None
            }
        }
    }
}
