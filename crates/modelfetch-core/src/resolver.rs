//! Mapping from `(repo_id, filename, revision)` to a download location.

use crate::config::FetchConfig;
use crate::error::{FetchError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Where a file can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub url: String,
    /// Size in bytes, when the resolver knows it.
    pub size: Option<u64>,
}

/// Resolves hub coordinates to a URL.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, repo_id: &str, filename: &str, revision: &str)
        -> Result<ResolvedLocation>;
}

/// Resolver for Hugging Face compatible hubs:
/// `<base>/<repo_id>/resolve/<revision>/<filename>`.
#[derive(Debug, Clone)]
pub struct HubResolver {
    base_url: String,
}

impl HubResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.endpoint.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the download URL. Each path segment is percent-encoded.
    pub fn file_url(&self, repo_id: &str, filename: &str, revision: &str) -> Result<String> {
        if repo_id.is_empty() || filename.is_empty() || revision.is_empty() {
            return Err(FetchError::InvalidRequest {
                message: format!(
                    "repo id, filename and revision are required (got {:?}, {:?}, {:?})",
                    repo_id, filename, revision
                ),
            });
        }

        Ok(format!(
            "{}/{}/resolve/{}/{}",
            self.base_url,
            encode_segments(repo_id),
            urlencoding::encode(revision),
            encode_segments(filename)
        ))
    }
}

#[async_trait]
impl LocationResolver for HubResolver {
    async fn resolve(
        &self,
        repo_id: &str,
        filename: &str,
        revision: &str,
    ) -> Result<ResolvedLocation> {
        Ok(ResolvedLocation {
            url: self.file_url(repo_id, filename, revision)?,
            size: None,
        })
    }
}

/// Percent-encode each `/`-separated segment, keeping the separators.
fn encode_segments(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
