//! Path expansion - turn root paths into a flat list of files
//!
//! Symlink policy: links met while walking a directory are skipped, never
//! followed. A root given on the command line is canonicalized once, so a
//! root that is itself a link is resolved to its target.

use crate::utils;
use globset::GlobSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Expands root paths into absolute regular-file paths
#[derive(Debug, Clone, Default)]
pub struct PathExpander {
    exclusions: Option<GlobSet>,
}

impl PathExpander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip files (and prune directories) matching any of these patterns
    pub fn with_exclusions(mut self, exclusions: GlobSet) -> Self {
        if !exclusions.is_empty() {
            self.exclusions = Some(exclusions);
        }
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.exclusions
            .as_ref()
            .map(|set| set.is_match(path))
            .unwrap_or(false)
    }

    /// Expand every root. Missing or unreadable roots contribute nothing.
    pub fn expand<P: AsRef<Path>>(&self, roots: &[P]) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for root in roots {
            self.expand_root(root.as_ref(), &mut files);
        }
        files
    }

    fn expand_root(&self, root: &Path, files: &mut Vec<PathBuf>) {
        let root = match std::fs::canonicalize(root) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!("skipping {}: {}", root.display(), e);
                return;
            }
        };

        let metadata = match std::fs::metadata(&root) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("skipping {}: {}", root.display(), e);
                return;
            }
        };

        if metadata.is_file() {
            if !self.is_excluded(&root) {
                files.push(root);
            }
            return;
        }

        if !metadata.is_dir() {
            return;
        }

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || (!self.is_excluded(entry.path())
                        && !utils::is_windows_reparse_point(entry.path()))
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    // Permission denied and vanished entries are routine here
                    tracing::debug!("walk error under {}: {}", root.display(), e);
                    continue;
                }
            };

            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
    }
}

/// Human-readable description of a set of roots, stored with the scan record
pub fn describe_roots<P: AsRef<Path>>(roots: &[P]) -> String {
    roots
        .iter()
        .map(|p| p.as_ref().display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
