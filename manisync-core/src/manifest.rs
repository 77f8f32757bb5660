use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

use crate::config::DEFAULT_VERSION;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct FileEntry {
    pub path: String,
    #[serde(deserialize_with = "size_from_number_or_string")]
    pub size: u64,
    pub hash: String,
    pub url: String,
}

/// Published catalog of every file under the content root.
///
/// Never edited in place: rebuilds produce a new value that replaces the old one.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(alias = "generatedat", default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// Metadata projection served to clients that only need to know whether to resync.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestInfo {
    pub version: String,
    pub generated_at: DateTime<Utc>,
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn size_from_number_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl Manifest {
    pub fn new(version: impl Into<String>, files: Vec<FileEntry>) -> Self {
        Self { version: version.into(), generated_at: Utc::now(), files }
    }

    pub fn info(&self) -> ManifestInfo {
        ManifestInfo { version: self.version.clone(), generated_at: self.generated_at }
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn find(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Returns the first path that appears more than once, if any.
    pub fn duplicate_path(&self) -> Option<&str> {
        let mut seen = HashSet::with_capacity(self.files.len());
        self.files.iter().map(|f| f.path.as_str()).find(|p| !seen.insert(*p))
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a persisted manifest, accepting property names in any case,
    /// trailing commas, unknown fields and sizes written as strings.
    pub fn from_json_lenient(src: &str) -> Result<Self, String> {
        if src.trim().is_empty() {
            return Err("empty document".into());
        }
        let cleaned = strip_trailing_commas(src);
        let mut value: serde_json::Value =
            serde_json::from_str(&cleaned).map_err(|e| e.to_string())?;
        lowercase_keys(&mut value);
        let mf: Manifest = serde_json::from_value(value).map_err(|e| e.to_string())?;
        if let Some(dup) = mf.duplicate_path() {
            return Err(format!("duplicate path {:?}", dup));
        }
        Ok(mf)
    }
}

fn lowercase_keys(v: &mut serde_json::Value) {
    match v {
        serde_json::Value::Object(map) => {
            let old = std::mem::take(map);
            for (k, mut child) in old {
                lowercase_keys(&mut child);
                map.insert(k.to_lowercase(), child);
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(lowercase_keys),
        _ => {}
    }
}

/// Drop commas that directly precede `}` or `]`, ignoring string contents.
fn strip_trailing_commas(src: &str) -> String {
    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut in_str = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if in_str {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_str = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_str = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}
