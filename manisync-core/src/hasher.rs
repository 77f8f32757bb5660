use sha2::Digest as _;
use std::fs::File;
use std::io::Read;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::DigestAlgorithm;
use crate::error::{Result, SyncError};

/// Files at or above this size are streamed through a pooled buffer.
pub const STREAM_THRESHOLD: u64 = 8 * 1024;
pub const BUFFER_SIZE: usize = 8 * 1024;

/// Something that turns a file into a lowercase hex digest.
///
/// `ContentHasher` is the real implementation; the scanner only depends on this seam.
pub trait FileHasher: Send + Sync {
    fn hash(&self, path: &Path) -> Result<String>;

    /// Digest together with the byte length it covers.
    ///
    /// The default stats the file around `hash` and fails if the length moved.
    fn hash_sized(&self, path: &Path) -> Result<(String, u64)> {
        let before = std::fs::metadata(path).map_err(|e| SyncError::io(path, e))?.len();
        let hash = self.hash(path)?;
        let after = std::fs::metadata(path).map_err(|e| SyncError::io(path, e))?.len();
        if before != after {
            return Err(SyncError::io(path, std::io::Error::other("file changed while hashing")));
        }
        Ok((hash, before))
    }

    /// Advisory check: any failure counts as a mismatch.
    fn verify(&self, path: &Path, expected: &str) -> bool {
        match self.hash(path) {
            Ok(actual) => {
                let ok = actual.eq_ignore_ascii_case(expected.trim());
                debug!(path = ?path, ok, "verified hash");
                ok
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "hash verification failed");
                false
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Counting semaphore bounding how many files are hashed at once.
struct Permits {
    available: Mutex<usize>,
    cv: Condvar,
}

struct Permit<'a> {
    owner: &'a Permits,
}

impl Permits {
    fn new(n: usize) -> Self {
        Self { available: Mutex::new(n.max(1)), cv: Condvar::new() }
    }

    fn acquire(&self) -> Permit<'_> {
        let mut n = lock(&self.available);
        while *n == 0 {
            n = self.cv.wait(n).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *n -= 1;
        Permit { owner: self }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        *lock(&self.owner.available) += 1;
        self.owner.cv.notify_one();
    }
}

/// Bounded free-list of fixed-size read buffers.
struct BufferPool {
    free: Mutex<Vec<Box<[u8]>>>,
    max_pooled: usize,
}

struct BufferLease<'a> {
    buf: Option<Box<[u8]>>,
    pool: &'a BufferPool,
}

impl BufferPool {
    fn new(max_pooled: usize) -> Self {
        Self { free: Mutex::new(Vec::with_capacity(max_pooled)), max_pooled }
    }

    fn lease(&self) -> BufferLease<'_> {
        let buf = lock(&self.free).pop().unwrap_or_else(|| vec![0u8; BUFFER_SIZE].into_boxed_slice());
        BufferLease { buf: Some(buf), pool: self }
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        lock(&self.free).len()
    }
}

impl Deref for BufferLease<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for BufferLease<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.fill(0);
            let mut free = lock(&self.pool.free);
            if free.len() < self.pool.max_pooled {
                free.push(buf);
            }
        }
    }
}

enum Digester {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Digester {
    fn new(algo: DigestAlgorithm) -> Self {
        match algo {
            DigestAlgorithm::Sha256 => Self::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

struct Inner {
    algo: DigestAlgorithm,
    permits: Permits,
    pool: BufferPool,
}

/// Content digest of whole files, shared by every caller of one engine.
///
/// Clones share the same permit pool and buffer pool, so the concurrency cap
/// holds across a rebuild and any ad-hoc verification running next to it.
#[derive(Clone)]
pub struct ContentHasher {
    inner: Arc<Inner>,
}

impl ContentHasher {
    pub fn new(algo: DigestAlgorithm, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            inner: Arc::new(Inner {
                algo,
                permits: Permits::new(max_concurrent),
                pool: BufferPool::new(max_concurrent),
            }),
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.inner.algo
    }

    /// Digest of an in-memory byte slice with the configured algorithm.
    pub fn hash_bytes(&self, data: &[u8]) -> String {
        let mut d = Digester::new(self.inner.algo);
        d.update(data);
        d.finalize_hex()
    }

    /// Digest and the number of bytes that went into it.
    fn hash_file(&self, path: &Path) -> std::io::Result<(String, u64)> {
        let mut f = File::open(path)?;
        let len = f.metadata()?.len();
        let mut d = Digester::new(self.inner.algo);
        let mut read = 0u64;
        if len >= STREAM_THRESHOLD {
            let mut buf = self.inner.pool.lease();
            loop {
                let n = f.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                d.update(&buf[..n]);
                read += n as u64;
            }
        } else {
            let mut bytes = Vec::with_capacity(len as usize);
            f.read_to_end(&mut bytes)?;
            d.update(&bytes);
            read = bytes.len() as u64;
        }
        Ok((d.finalize_hex(), read))
    }

    fn hash_counted(&self, path: &Path) -> Result<(String, u64)> {
        let _permit = self.inner.permits.acquire();
        match self.hash_file(path) {
            Ok((hex, len)) => {
                debug!(path = ?path, hash = %hex, len, "hashed file");
                Ok((hex, len))
            }
            Err(e) => Err(SyncError::io(path, e)),
        }
    }
}

impl FileHasher for ContentHasher {
    fn hash(&self, path: &Path) -> Result<String> {
        self.hash_counted(path).map(|(hex, _)| hex)
    }

    fn hash_sized(&self, path: &Path) -> Result<(String, u64)> {
        self.hash_counted(path)
    }
}
