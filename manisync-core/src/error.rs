use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A single file could not be read or hashed.
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The content root is missing or cannot be listed.
    #[error("cannot scan content root {root:?}: {source}")]
    Scan {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist manifest to {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted manifest exists but could not be used.
    #[error("persisted manifest {path:?} is unusable: {reason}")]
    Load { path: PathBuf, reason: String },

    /// The caller stopped waiting. Any rebuild in flight keeps running.
    #[error("request cancelled before the manifest was ready")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
