//! Path sandbox: keeps every user-supplied path inside a configured root.
//!
//! Raw values are always interpreted relative to the root, even when they start
//! with a `/`: the root and the raw value are concatenated as strings and the
//! result is normalized lexically. Nothing here touches the filesystem, so
//! symlinks inside the root are not followed.

use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("cannot move outside of directory '{root}' (resolved to '{path}')")]
    Escape { path: String, root: String },
}

/// A normalized root directory that resolved paths may not escape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    root: String,
}

impl Sandbox {
    pub fn new(root: impl AsRef<str>) -> Self {
        let mut root = normalize(root.as_ref());
        if !root.ends_with('/') {
            root.push('/');
        }
        Self { root }
    }

    /// The normalized root, always ending with `/`.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Resolves a file-valued setting.
    pub fn resolve_file(&self, raw: &str) -> Result<PathBuf, SandboxError> {
        self.contain(&format!("{}{}", self.root, raw))
    }

    /// Resolves a directory-valued setting. The result always ends with `/`.
    pub fn resolve_dir(&self, raw: &str) -> Result<PathBuf, SandboxError> {
        if raw.ends_with('/') {
            self.resolve_file(raw)
        } else {
            self.resolve_file(&format!("{raw}/"))
        }
    }

    /// Normalizes an already-built candidate and checks that it stays inside.
    ///
    /// Absolute candidates must live under the root. Relative candidates are
    /// taken relative to the working directory and must not climb out of it.
    pub fn contain(&self, candidate: &str) -> Result<PathBuf, SandboxError> {
        let normalized = normalize(candidate);

        let inside = if normalized.starts_with('/') {
            normalized.starts_with(&self.root) || format!("{normalized}/") == self.root
        } else {
            normalized != ".." && !normalized.starts_with("../")
        };

        if !inside {
            warn!(path = %normalized, root = %self.root, "Rejected path escaping the sandbox root");
            return Err(SandboxError::Escape {
                path: normalized,
                root: self.root.clone(),
            });
        }

        debug!(candidate, resolved = %normalized, "Resolved sandboxed path");
        Ok(PathBuf::from(normalized))
    }
}

/// Lexical normalization in the manner of POSIX `path.normalize`.
///
/// Collapses repeated separators, drops `.` segments, resolves `..` against
/// the previous segment and keeps a trailing separator. `..` never climbs
/// above `/` for absolute paths; leading `..` segments of relative paths are
/// kept. An empty result becomes `.`.
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let absolute = path.starts_with('/');
    let trailing = path.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let mut out = segments.join("/");
    if absolute {
        out.insert(0, '/');
    }
    if out.is_empty() {
        out.push('.');
    }
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    out
}
