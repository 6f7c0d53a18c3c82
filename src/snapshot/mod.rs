//! Read-only, bounded view of a repository tree
//!
//! Analyzers and the remediation tool loop see the repository only through
//! a [`Snapshot`]: depth-bounded listing, size-capped reads, and path
//! confinement to the repository root.

use crate::error::{Error, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy)]
pub struct SnapshotLimits {
    pub max_file_bytes: u64,
    pub max_depth: usize,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 256 * 1024,
            max_depth: 16,
        }
    }
}

/// One file visible in the snapshot, path relative to the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub path: String,
    pub size: u64,
}

/// Directory listing entry returned by [`Snapshot::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

pub struct Snapshot {
    root: PathBuf,
    limits: SnapshotLimits,
    exclude: Vec<Pattern>,
    files: Vec<SnapshotFile>,
}

impl Snapshot {
    /// Walk the repository once and capture the bounded file inventory.
    pub fn capture(root: &Path, limits: SnapshotLimits, exclude: &[String]) -> Result<Self> {
        let root = root
            .canonicalize()
            .map_err(|e| Error::Infrastructure(format!("repository root {root:?}: {e}")))?;

        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut files = Vec::new();
        for entry in WalkDir::new(&root)
            .max_depth(limits.max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let rel = e.path().strip_prefix(&root).unwrap_or(e.path());
                !is_excluded(rel, &exclude)
            })
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            files.push(SnapshotFile { path: rel, size });
        }

        debug!("Captured snapshot of {} files under {:?}", files.len(), root);
        Ok(Self {
            root,
            limits,
            exclude,
            files,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[SnapshotFile] {
        &self.files
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.path == path)
    }

    /// Resolve a relative path inside the root, rejecting traversal.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return Err(Error::PathTraversal(path.to_string()));
        }
        for component in candidate.components() {
            match component {
                Component::ParentDir | Component::Prefix(_) | Component::RootDir => {
                    return Err(Error::PathTraversal(path.to_string()));
                }
                _ => {}
            }
        }
        let joined = self.root.join(candidate);
        // Symlinks can still escape; canonicalize what exists and re-check.
        if joined.exists() {
            let resolved = joined.canonicalize()?;
            if !resolved.starts_with(&self.root) {
                return Err(Error::PathTraversal(path.to_string()));
            }
            return Ok(resolved);
        }
        Ok(joined)
    }

    /// Read a file's content, bounded by the snapshot's size limit.
    pub async fn read(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|_| Error::NotFound(path.to_string()))?;
        if metadata.len() > self.limits.max_file_bytes {
            return Err(Error::FileTooLarge {
                path: path.to_string(),
                size: metadata.len(),
                limit: self.limits.max_file_bytes,
            });
        }
        Ok(tokio::fs::read_to_string(&resolved).await?)
    }

    /// List entries under a subpath, bounded by depth.
    pub fn list(&self, path: &str, depth: usize) -> Result<Vec<TreeEntry>> {
        let base = if path.is_empty() || path == "." {
            self.root.clone()
        } else {
            self.resolve(path)?
        };
        let depth = depth.min(self.limits.max_depth).max(1);

        let mut entries = Vec::new();
        for entry in WalkDir::new(&base)
            .min_depth(1)
            .max_depth(depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let rel = e.path().strip_prefix(&self.root).unwrap_or(e.path());
                !is_excluded(rel, &self.exclude)
            })
            .flatten()
        {
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            entries.push(TreeEntry {
                path: rel,
                is_dir: entry.file_type().is_dir(),
                size: entry.metadata().map(|m| m.len()).unwrap_or(0),
            });
        }
        Ok(entries)
    }
}

fn is_excluded(rel: &Path, exclude: &[Pattern]) -> bool {
    let rel_str = rel.to_string_lossy();
    exclude.iter().any(|p| p.matches(&rel_str))
}
