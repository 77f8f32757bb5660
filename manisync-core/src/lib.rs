pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod manifest;
pub mod paths;
pub mod progress;
pub mod scanner;
pub mod store;
pub mod verify;
pub mod watcher;

pub use api::ManifestService;
pub use config::{DigestAlgorithm, EngineConfig, PathStyle};
pub use engine::{EngineState, SyncEngine};
pub use error::{Result, SyncError};
pub use hasher::{ContentHasher, FileHasher};
pub use manifest::{FileEntry, Manifest, ManifestInfo};
pub use store::ManifestStore;
