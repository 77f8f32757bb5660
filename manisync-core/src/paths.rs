use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::config::PathStyle;

/// Bytes escaped inside one URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'\\');

/// Path of `path` relative to `root`, or `None` when it does not live under it.
pub fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    let rel = pathdiff::diff_paths(path, root)?;
    if rel.as_os_str().is_empty() || rel.components().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }
    Some(rel)
}

/// `/`-joined components of a relative path, used for URLs and glob matching.
pub fn to_slash(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Render a relative path for the manifest `path` field.
pub fn render(rel: &Path, style: PathStyle) -> String {
    match style {
        PathStyle::Native => rel.to_string_lossy().to_string(),
        PathStyle::Posix => to_slash(rel),
        PathStyle::Windows => to_slash(rel).replace('/', "\\"),
    }
}

/// First component of `rel` that has no unambiguous rendering.
///
/// Names that are not UTF-8 would be replaced lossily and can collide. A
/// backslash inside a name reads as a separator once rendered Windows-style
/// and when the entry is resolved again.
pub fn unrepresentable(rel: &Path) -> Option<&OsStr> {
    rel.components().find_map(|c| match c {
        Component::Normal(s) => match s.to_str() {
            Some(name) if !name.contains('\\') => None,
            _ => Some(s),
        },
        _ => None,
    })
}

/// `base` joined with the percent-encoded segments of `rel`.
pub fn join_url(base: &str, rel: &Path) -> String {
    let segments: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => {
                Some(utf8_percent_encode(&s.to_string_lossy(), SEGMENT).to_string())
            }
            _ => None,
        })
        .collect();
    format!("{}/{}", base.trim_end_matches('/'), segments.join("/"))
}

/// Resolve a manifest `path` field under `root`.
///
/// Accepts either separator. Rejects absolute paths and parent traversal, and
/// refuses to pass through symlinks so a manifest cannot point outside the root.
pub fn resolve_entry(root: &Path, entry_path: &str) -> Result<PathBuf, String> {
    let normalized = entry_path.replace('\\', "/");
    if normalized.starts_with('/') || normalized.contains(':') {
        return Err(format!("absolute paths are not allowed: {:?}", entry_path));
    }
    let mut candidate = root.to_path_buf();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(format!("parent traversal not allowed: {:?}", entry_path)),
            p => {
                candidate.push(p);
                if let Ok(m) = std::fs::symlink_metadata(&candidate) {
                    if m.file_type().is_symlink() {
                        return Err(format!("symlink in path (not following): {:?}", candidate));
                    }
                }
            }
        }
    }
    if candidate == root {
        return Err(format!("empty path: {:?}", entry_path));
    }
    Ok(candidate)
}
