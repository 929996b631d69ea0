//! Snapshot cache: path layout, statistics and eviction.

mod glob;
mod paths;
mod store;

pub use glob::glob_match;
pub use paths::{is_gguf, is_partial, partial_path, sanitize_repo_id, unsanitize_repo_id, CacheKey};
pub use store::{CacheStats, CacheStore, CachedRepo, ClearResult};
