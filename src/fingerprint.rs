//! Content fingerprinting of the project tree and agent-log signatures.
//!
//! A fingerprint is a SHA-256 digest over the sorted set of (path, content
//! digest) pairs, so two trees with identical tracked content produce the
//! same value regardless of traversal order. When git is available the file
//! set comes from `git ls-files` (tracked plus untracked-but-not-ignored);
//! otherwise a filesystem walk prunes heavy directories by name.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha256};

use crate::error::{DroverError, Result};

/// Computes project-tree fingerprints with a stat-keyed memo.
#[derive(Debug, Default)]
pub struct Fingerprinter {
    /// Directory names pruned during the fallback walk.
    skip_dirs: Vec<String>,
    /// (stat marker, digest) for the last computed root.
    memo: Option<(String, String)>,
}

impl Fingerprinter {
    pub fn new(skip_dirs: Vec<String>) -> Self {
        Self {
            skip_dirs,
            memo: None,
        }
    }

    /// Fingerprint the tree rooted at `root`.
    ///
    /// Fails with `PathNotFound` if the root is missing and
    /// `HashUnavailable` if no file enumeration strategy works. Callers must
    /// treat failure as "unknown state", never as "no change". An empty tree
    /// is a valid state and hashes to a stable digest.
    pub fn fingerprint(&mut self, root: &Path) -> Result<String> {
        if !root.is_dir() {
            return Err(DroverError::PathNotFound(root.to_path_buf()));
        }

        let files = match self.git_file_list(root) {
            Some(files) => files,
            None => self.walk_file_list(root).map_err(|e| {
                DroverError::HashUnavailable(format!(
                    "cannot enumerate {}: {}",
                    root.display(),
                    e
                ))
            })?,
        };

        // The marker covers the sorted file list and each file's mtime in
        // nanoseconds plus its length, so deletions and sub-second edits
        // invalidate the memo.
        let marker = stat_marker(root, &files);
        if let Some((cached_marker, digest)) = &self.memo {
            if *cached_marker == marker {
                return Ok(digest.clone());
            }
        }

        let mut entries: Vec<(String, String)> = Vec::with_capacity(files.len());
        for rel in &files {
            let full = root.join(rel);
            // Files can vanish between enumeration and hashing; skip them.
            let content = match fs::read(&full) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            let mut hasher = Sha256::new();
            hasher.update(&content);
            entries.push((rel.to_string_lossy().to_string(), hex::encode(hasher.finalize())));
        }

        entries.sort();
        let mut hasher = Sha256::new();
        for (path, content_digest) in &entries {
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            hasher.update(content_digest.as_bytes());
            hasher.update(b"\n");
        }
        let digest = hex::encode(hasher.finalize());
        self.memo = Some((marker, digest.clone()));
        Ok(digest)
    }

    /// Fast path: tracked + untracked-but-not-ignored files from git.
    fn git_file_list(&self, root: &Path) -> Option<Vec<PathBuf>> {
        let output = Command::new("git")
            .args(["ls-files", "--cached", "--others", "--exclude-standard"])
            .current_dir(root)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let listing = String::from_utf8_lossy(&output.stdout);
        let files: Vec<PathBuf> = listing
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(PathBuf::from)
            .collect();
        Some(files)
    }

    /// Fallback: recursive walk pruning the configured heavy directories.
    fn walk_file_list(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        self.walk_into(root, root, &mut files)?;
        Ok(files)
    }

    fn walk_into(&self, root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if self.skip_dirs.iter().any(|d| *d == name) {
                    continue;
                }
                self.walk_into(root, &path, out)?;
            } else if path.is_file() {
                if let Ok(rel) = path.strip_prefix(root) {
                    out.push(rel.to_path_buf());
                }
            }
        }
        Ok(())
    }
}

/// Cache-invalidation marker over the enumerated files' stat data.
///
/// Digest of the sorted (path, mtime nanoseconds, length) triples. Any
/// file addition, removal, rename, resize or touch changes the marker.
fn stat_marker(root: &Path, files: &[PathBuf]) -> String {
    let mut stats: Vec<(String, u128, u64)> = files
        .iter()
        .filter_map(|rel| {
            let meta = fs::metadata(root.join(rel)).ok()?;
            let mtime = meta
                .modified()
                .ok()?
                .duration_since(std::time::UNIX_EPOCH)
                .ok()?
                .as_nanos();
            Some((rel.to_string_lossy().to_string(), mtime, meta.len()))
        })
        .collect();
    stats.sort();
    let mut hasher = Sha256::new();
    for (path, mtime, len) in &stats {
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
        hasher.update(mtime.to_le_bytes());
        hasher.update(len.to_le_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Signature over the trailing `n` lines of agent output.
///
/// Deterministic for identical tails; used for loop detection.
pub fn signature(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    let tail = lines[start..].join("\n");
    let mut hasher = Sha256::new();
    hasher.update(tail.as_bytes());
    hex::encode(hasher.finalize())
}
