use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

pub const DEFAULT_MANIFEST_FILE: &str = "manifest.json";
pub const DEFAULT_VERSION: &str = "1.0";
pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;

/// Digest used for `FileEntry::hash`. Clients must agree on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

/// Separator convention for `FileEntry::path`. URLs always use `/`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStyle {
    #[default]
    Native,
    Posix,
    Windows,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub content_root: PathBuf,
    pub data_dir: PathBuf,
    pub base_url: String,
    pub manifest_file_name: String,
    pub default_version: String,
    pub debounce_ms: u64,
    pub hash_concurrency: usize,
    pub digest: DigestAlgorithm,
    pub path_style: PathStyle,
    /// Glob patterns matched against root-relative, `/`-separated paths.
    pub exclude: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("/opt/manisync/files"),
            data_dir: PathBuf::from("/var/lib/manisync"),
            base_url: "http://localhost:5000".to_string(),
            manifest_file_name: DEFAULT_MANIFEST_FILE.to_string(),
            default_version: DEFAULT_VERSION.to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            hash_concurrency: default_hash_concurrency(),
            digest: DigestAlgorithm::default(),
            path_style: PathStyle::default(),
            exclude: Vec::new(),
        }
    }
}

/// Twice the available parallelism, falling back to 2 when it is unknown.
pub fn default_hash_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get() * 2).unwrap_or(2)
}

impl EngineConfig {
    pub fn new(
        content_root: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            content_root: content_root.into(),
            data_dir: data_dir.into(),
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Read a TOML config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {:?}", path))?;
        let cfg: Self =
            toml::from_str(&content).with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Config("base_url must not be empty".into()));
        }
        if self.debounce_ms == 0 {
            return Err(SyncError::Config("debounce_ms must be positive".into()));
        }
        if self.hash_concurrency == 0 {
            return Err(SyncError::Config("hash_concurrency must be positive".into()));
        }
        let name = self.manifest_file_name.as_str();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(SyncError::Config(format!("bad manifest_file_name {:?}", name)));
        }
        self.exclude_set()?;
        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join(&self.manifest_file_name)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Base URL without trailing slashes.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn exclude_set(&self) -> Result<GlobSet, SyncError> {
        let mut b = GlobSetBuilder::new();
        for g in &self.exclude {
            let glob = Glob::new(g)
                .map_err(|e| SyncError::Config(format!("bad exclude pattern {:?}: {}", g, e)))?;
            b.add(glob);
        }
        b.build().map_err(|e| SyncError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_only_given_keys() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            content_root = "/srv/files"
            base_url = "https://cdn.example.com/"
            digest = "blake3"
            path_style = "windows"
            exclude = ["*.tmp"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.content_root, PathBuf::from("/srv/files"));
        assert_eq!(cfg.base_url(), "https://cdn.example.com");
        assert_eq!(cfg.digest, DigestAlgorithm::Blake3);
        assert_eq!(cfg.path_style, PathStyle::Windows);
        assert_eq!(cfg.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(cfg.manifest_file_name, DEFAULT_MANIFEST_FILE);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = EngineConfig::new("/a", "/b", "");
        assert!(cfg.validate().is_err());
        cfg.base_url = "http://x".into();
        cfg.manifest_file_name = "sub/manifest.json".into();
        assert!(cfg.validate().is_err());
        cfg.manifest_file_name = DEFAULT_MANIFEST_FILE.into();
        cfg.exclude = vec!["[".into()];
        assert!(cfg.validate().is_err());
        cfg.exclude.clear();
        cfg.hash_concurrency = 0;
        assert!(cfg.validate().is_err());
    }
}
