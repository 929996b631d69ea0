//! On-disk snapshot cache.
//!
//! A file is cached iff its canonical path exists. In-progress downloads live
//! next to it as `<canonical path>.part` and are never counted as cached.

use super::glob::glob_match;
use super::paths::{is_gguf, is_partial, sanitize_repo_id, unsanitize_repo_id, CacheKey};
use crate::config::{CacheConfig, FetchConfig};
use crate::error::{FetchError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Aggregate cache statistics, recomputed on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_files: u64,
    pub total_size: u64,
    pub num_repos: u64,
    pub num_gguf_files: u64,
    pub gguf_size: u64,
}

/// Outcome of a bulk eviction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResult {
    /// Human-readable ids of the removed repositories.
    pub repos_removed: Vec<String>,
    /// Sum of file sizes measured before deletion.
    pub bytes_freed: u64,
}

/// One cached repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRepo {
    pub repo_id: String,
    pub files: u64,
    pub size_bytes: u64,
}

/// Snapshot cache rooted at a directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Create a cache store at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.cache_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/models--<org>--<name>`
    pub fn repo_dir(&self, repo_id: &str) -> PathBuf {
        self.root.join(sanitize_repo_id(repo_id))
    }

    /// `<root>/models--<org>--<name>/snapshots/<revision>`
    pub fn snapshot_dir(&self, repo_id: &str, revision: &str) -> PathBuf {
        self.repo_dir(repo_id)
            .join(CacheConfig::SNAPSHOTS_DIR_NAME)
            .join(revision)
    }

    /// Canonical path for a cache key.
    pub fn path_for(&self, key: &CacheKey) -> Result<PathBuf> {
        key.validate()?;
        Ok(self
            .snapshot_dir(&key.repo_id, &key.revision)
            .join(&key.filename))
    }

    /// Check whether the canonical file exists. Partials do not count.
    pub fn is_cached(&self, key: &CacheKey) -> bool {
        self.get_cached_file(key).is_some()
    }

    /// Canonical path of a cached file, if present.
    pub fn get_cached_file(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.path_for(key).ok()?;
        path.is_file().then_some(path)
    }

    /// Create the snapshot directories for a key and return its canonical path.
    ///
    /// Callers write to `<path>.part` and rename on completion.
    pub fn prepare_cache_path(&self, key: &CacheKey) -> Result<PathBuf> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FetchError::io_with_path(e, parent))?;
        }
        debug!(key = %key, path = %path.display(), "Prepared cache path");
        Ok(path)
    }

    /// Walk every `models--*` directory and aggregate file counts and sizes.
    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();

        for repo_dir in self.repo_dirs()? {
            stats.num_repos += 1;
            for (path, size) in files_under(&repo_dir)? {
                if is_partial(&path) {
                    continue;
                }
                stats.total_files += 1;
                stats.total_size += size;
                if is_gguf(&path) {
                    stats.num_gguf_files += 1;
                    stats.gguf_size += size;
                }
            }
        }

        Ok(stats)
    }

    /// List cached repositories sorted by repo id.
    pub fn list_repos(&self) -> Result<Vec<CachedRepo>> {
        let mut repos = Vec::new();
        for repo_dir in self.repo_dirs()? {
            let Some(repo_id) = repo_dir
                .file_name()
                .and_then(|n| unsanitize_repo_id(&n.to_string_lossy()))
            else {
                continue;
            };
            let (files, size_bytes) = files_under(&repo_dir)?
                .into_iter()
                .filter(|(path, _)| !is_partial(path))
                .fold((0, 0), |(n, total), (_, size)| (n + 1, total + size));
            repos.push(CachedRepo {
                repo_id,
                files,
                size_bytes,
            });
        }
        repos.sort_by(|a, b| a.repo_id.cmp(&b.repo_id));
        Ok(repos)
    }

    /// Remove every cached repository.
    pub fn clear_all(&self) -> Result<ClearResult> {
        self.clear_matching(|_| true)
    }

    /// Remove one repository. Returns bytes freed; zero if it was not cached.
    pub fn clear_repo(&self, repo_id: &str) -> Result<u64> {
        let dir = self.repo_dir(repo_id);
        let freed = remove_tree(&dir)?;
        if freed > 0 {
            info!(repo_id, bytes_freed = freed, "Cleared cached repository");
        }
        Ok(freed)
    }

    /// Remove every repository whose id matches a wildcard pattern.
    ///
    /// The pattern is matched against the human-readable id (`org/name`),
    /// not the directory name.
    pub fn clear_pattern(&self, pattern: &str) -> Result<ClearResult> {
        self.clear_matching(|repo_id| glob_match(repo_id, pattern))
    }

    /// Delete `.part` files left behind by interrupted downloads.
    pub fn clean_partials(&self) -> Result<u64> {
        let mut freed = 0;
        for (path, size) in files_under(&self.root)? {
            if !is_partial(&path) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), size, "Removed partial download");
                    freed += size;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(FetchError::io_with_path(e, &path)),
            }
        }
        if freed > 0 {
            info!(bytes_freed = freed, "Cleaned partial downloads");
        }
        Ok(freed)
    }

    fn clear_matching(&self, predicate: impl Fn(&str) -> bool) -> Result<ClearResult> {
        let mut result = ClearResult::default();

        for repo_dir in self.repo_dirs()? {
            let Some(repo_id) = repo_dir
                .file_name()
                .and_then(|n| unsanitize_repo_id(&n.to_string_lossy()))
            else {
                continue;
            };
            if !predicate(&repo_id) {
                continue;
            }
            result.bytes_freed += remove_tree(&repo_dir)?;
            result.repos_removed.push(repo_id);
        }

        result.repos_removed.sort();
        info!(
            repos = result.repos_removed.len(),
            bytes_freed = result.bytes_freed,
            "Cleared cache entries"
        );
        Ok(result)
    }

    /// Top-level `models--*` directories. A missing root yields none.
    fn repo_dirs(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FetchError::io_with_path(e, &self.root)),
        };

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FetchError::io_with_path(e, &self.root))?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(CacheConfig::REPO_DIR_PREFIX) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

/// All regular files below `dir` with their sizes. Symlinks are followed for
/// sizing so hub-style snapshot links report the blob size.
fn files_under(dir: &Path) -> Result<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_not_found(&e) => continue,
            Err(e) => return Err(e.into()),
        };
        if entry.file_type().is_dir() {
            continue;
        }
        match std::fs::metadata(entry.path()) {
            Ok(meta) if meta.is_file() => files.push((entry.into_path(), meta.len())),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %entry.path().display(), "Skipping dangling cache entry");
            }
            Err(e) => return Err(FetchError::io_with_path(e, entry.path())),
        }
    }
    Ok(files)
}

/// Sum file sizes under `dir`, then delete it. Missing directories free zero.
fn remove_tree(dir: &Path) -> Result<u64> {
    let freed = files_under(dir)?.iter().map(|(_, size)| size).sum();
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(freed),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(FetchError::io_with_path(e, dir)),
    }
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|e| e.kind() == std::io::ErrorKind::NotFound)
        .unwrap_or(false)
}
