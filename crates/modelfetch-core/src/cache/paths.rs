//! Cache key to path mapping.
//!
//! Layout (compatible with the Hugging Face hub cache):
//! ```text
//! <root>/
//! ├── models--TheBloke--Llama-2-7B-GGUF/
//! │   └── snapshots/
//! │       └── main/
//! │           ├── llama-2-7b.Q4_K_M.gguf
//! │           └── llama-2-7b.Q5_K_M.gguf.part
//! └── models--org--name/
//!     └── ...
//! ```

use crate::config::{CacheConfig, NetworkConfig};
use crate::error::{FetchError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Identifies one cached file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub repo_id: String,
    pub filename: String,
    pub revision: String,
}

impl CacheKey {
    pub fn new(
        repo_id: impl Into<String>,
        filename: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: filename.into(),
            revision: revision.into(),
        }
    }

    /// Key on the default revision.
    pub fn main(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self::new(repo_id, filename, NetworkConfig::DEFAULT_REVISION)
    }

    /// Reject keys that could escape the cache root or whose repo id would
    /// not survive the directory-name round trip.
    pub fn validate(&self) -> Result<()> {
        check_relative("repo id", &self.repo_id)?;
        check_repo_shape(&self.repo_id)?;
        check_relative("filename", &self.filename)?;
        check_relative("revision", &self.revision)?;
        if self.revision.contains('/') || self.revision.contains('\\') {
            // Revisions name a single snapshot directory.
            return Err(FetchError::Cache {
                message: format!("revision must not contain path separators: {}", self.revision),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.repo_id, self.revision, self.filename)
    }
}

/// Convert a repo id to its cache directory name.
///
/// e.g., "TheBloke/Llama-2-7B-GGUF" -> "models--TheBloke--Llama-2-7B-GGUF"
pub fn sanitize_repo_id(repo_id: &str) -> String {
    format!(
        "{}{}",
        CacheConfig::REPO_DIR_PREFIX,
        repo_id.replace('/', CacheConfig::REPO_SEPARATOR)
    )
}

/// Convert a cache directory name back to a repo id.
///
/// Only the first `--` after the prefix separates org from name; model names
/// may themselves contain `--`, organisation names cannot.
///
/// e.g., "models--TheBloke--Llama-2-7B-GGUF" -> "TheBloke/Llama-2-7B-GGUF"
pub fn unsanitize_repo_id(dir_name: &str) -> Option<String> {
    dir_name
        .strip_prefix(CacheConfig::REPO_DIR_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(|rest| rest.replacen(CacheConfig::REPO_SEPARATOR, "/", 1))
}

/// Partial download marker for a final path: `<path>.part`.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(NetworkConfig::DOWNLOAD_TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Whether a path is a partial download marker.
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(NetworkConfig::DOWNLOAD_TEMP_SUFFIX))
        .unwrap_or(false)
}

/// Whether a path names a GGUF weight file.
pub fn is_gguf(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let name = n.to_string_lossy();
            CacheConfig::GGUF_SUFFIXES.iter().any(|s| name.ends_with(s))
        })
        .unwrap_or(false)
}

/// Repo ids are `<name>` or `<org>/<name>`; the org may not contain `--`.
fn check_repo_shape(repo_id: &str) -> Result<()> {
    let mut parts = repo_id.split('/');
    let first = parts.next().unwrap_or_default();
    let second = parts.next();
    let malformed = parts.next().is_some()
        || repo_id.contains('\\')
        || match second {
            Some(name) => first.is_empty() || name.is_empty() || first.contains(CacheConfig::REPO_SEPARATOR),
            None => first.contains(CacheConfig::REPO_SEPARATOR),
        };
    if malformed {
        return Err(FetchError::Cache {
            message: format!("repo id must look like <org>/<name>: {}", repo_id),
        });
    }
    Ok(())
}

fn check_relative(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(FetchError::Cache {
            message: format!("{} must not be empty", what),
        });
    }
    let path = Path::new(value);
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || value.starts_with('/') || value.starts_with('\\') {
        return Err(FetchError::Cache {
            message: format!("{} must be a relative path without '..': {}", what, value),
        });
    }
    Ok(())
}
