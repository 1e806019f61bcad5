//! Markdown discovery for one input directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Extensions recognized as Markdown. Matching is case-sensitive.
pub const MARKDOWN_EXTENSIONS: [&str; 2] = ["md", "markdown"];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read input directory {dir:?}: {source}")]
    Unreadable {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no markdown files found in {dir:?}")]
    NoMarkdownFiles { dir: PathBuf },
    #[error("'{first}' and '{second}' would both be written as '{stem}'")]
    Collision {
        stem: String,
        first: String,
        second: String,
    },
}

/// One input file and the name its artifacts are written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// File name relative to the input directory.
    pub file_name: String,
    pub stem: String,
}

impl DiscoveredFile {
    pub fn new(file_name: impl Into<String>, keep_extension: bool) -> Self {
        let file_name = file_name.into();
        let stem = if keep_extension {
            file_name.clone()
        } else {
            Path::new(&file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file_name.clone())
        };
        Self { file_name, stem }
    }

    pub fn html_name(&self) -> String {
        format!("{}.html", self.stem)
    }

    pub fn pdf_name(&self) -> String {
        format!("{}.pdf", self.stem)
    }
}

pub fn is_markdown(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MARKDOWN_EXTENSIONS.contains(&ext))
}

/// Keeps the Markdown names, preserving their order.
pub fn filter_markdown<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names
        .into_iter()
        .map(Into::into)
        .filter(|name| is_markdown(name))
        .collect()
}

/// Lists `dir` and returns its Markdown files sorted by name.
///
/// Fails when the directory cannot be read, when nothing matches, or (unless
/// `keep_extension` is set) when two files would produce the same artifact names.
pub async fn discover(dir: &Path, keep_extension: bool) -> Result<Vec<DiscoveredFile>, DiscoveryError> {
    info!(dir = %dir.display(), "[DISCOVER] Listing input directory");
    let unreadable = |source: std::io::Error| {
        error!(dir = %dir.display(), error = ?source, "[DISCOVER][ERROR] Input directory unreadable");
        DiscoveryError::Unreadable {
            dir: dir.to_path_buf(),
            source,
        }
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(unreadable)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        let path = entry.path();
        // Follows symlinks, so a link to a directory is skipped like the directory itself.
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                debug!(path = %path.display(), "Skipping directory entry");
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(path = %path.display(), error = ?e, "[DISCOVER] Skipping entry that cannot be inspected");
                continue;
            }
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    let files: Vec<DiscoveredFile> = filter_markdown(names)
        .into_iter()
        .map(|name| DiscoveredFile::new(name, keep_extension))
        .collect();

    if files.is_empty() {
        error!(dir = %dir.display(), "[DISCOVER][ERROR] No markdown files found");
        return Err(DiscoveryError::NoMarkdownFiles { dir: dir.to_path_buf() });
    }

    check_collisions(&files)?;

    info!(count = files.len(), "[DISCOVER] Markdown files found");
    Ok(files)
}

/// Rejects two files that would be written under the same stem.
pub fn check_collisions(files: &[DiscoveredFile]) -> Result<(), DiscoveryError> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for file in files {
        if let Some(first) = seen.insert(&file.stem, &file.file_name) {
            error!(stem = %file.stem, first, second = %file.file_name, "[DISCOVER][ERROR] Output name collision");
            return Err(DiscoveryError::Collision {
                stem: file.stem.clone(),
                first: first.to_string(),
                second: file.file_name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_is_case_sensitive_and_ordered() {
        let names = filter_markdown(["a.md", "b.txt", "c.markdown", "d.MD"]);
        assert_eq!(names, vec!["a.md".to_string(), "c.markdown".to_string()]);
    }

    #[test]
    fn stem_drops_only_the_last_extension() {
        let file = DiscoveredFile::new("release.notes.md", false);
        assert_eq!(file.stem, "release.notes");
        assert_eq!(file.pdf_name(), "release.notes.pdf");
    }

    #[test]
    fn keep_extension_uses_full_name() {
        let file = DiscoveredFile::new("report.md", true);
        assert_eq!(file.html_name(), "report.md.html");
    }

    #[test]
    fn files_without_a_stem_are_not_markdown() {
        assert!(!is_markdown(".md"));
        assert!(!is_markdown("md"));
    }
}
