use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

/// Counters shared by the hashing workers of one scan.
#[derive(Clone)]
pub struct ScanProgress {
    started: Instant,
    files_hashed: Arc<AtomicU64>,
    files_skipped: Arc<AtomicU64>,
    bytes_hashed: Arc<AtomicU64>,
}

/// Snapshot taken when a scan finishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files_hashed: u64,
    pub files_skipped: u64,
    pub bytes_hashed: u64,
    pub elapsed: Duration,
}

impl ScanProgress {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            files_hashed: Arc::new(AtomicU64::new(0)),
            files_skipped: Arc::new(AtomicU64::new(0)),
            bytes_hashed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn file_hashed(&self, bytes: u64) {
        self.files_hashed.fetch_add(1, Ordering::Relaxed);
        self.bytes_hashed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn file_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish(&self) -> ScanStats {
        ScanStats {
            files_hashed: self.files_hashed.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            bytes_hashed: self.bytes_hashed.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}
