use rayon::prelude::*;
use std::path::Path;
use tracing::warn;

use crate::hasher::FileHasher;
use crate::manifest::{FileEntry, Manifest};
use crate::paths;

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub files_ok: u64,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
    /// Entries whose path would escape the root.
    pub rejected: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty() && self.rejected.is_empty()
    }
}

enum Outcome {
    Ok,
    Mismatch,
    Missing,
    Rejected,
}

fn check(root: &Path, fe: &FileEntry, hasher: &dyn FileHasher) -> Outcome {
    let path = match paths::resolve_entry(root, &fe.path) {
        Ok(p) => p,
        Err(reason) => {
            warn!(%reason, "refusing manifest entry");
            return Outcome::Rejected;
        }
    };
    match std::fs::metadata(&path) {
        Ok(m) if m.is_file() => {
            if m.len() == fe.size && hasher.verify(&path, &fe.hash) {
                Outcome::Ok
            } else {
                Outcome::Mismatch
            }
        }
        _ => Outcome::Missing,
    }
}

/// Re-hash every file listed in `manifest` under `root` and compare.
pub fn verify(manifest: &Manifest, root: &Path, hasher: &dyn FileHasher) -> VerifyReport {
    let outcomes: Vec<Outcome> = manifest.files.par_iter().map(|fe| check(root, fe, hasher)).collect();
    let mut report = VerifyReport::default();
    for (fe, outcome) in manifest.files.iter().zip(outcomes) {
        match outcome {
            Outcome::Ok => report.files_ok += 1,
            Outcome::Mismatch => report.mismatched.push(fe.path.clone()),
            Outcome::Missing => report.missing.push(fe.path.clone()),
            Outcome::Rejected => report.rejected.push(fe.path.clone()),
        }
    }
    report
}
