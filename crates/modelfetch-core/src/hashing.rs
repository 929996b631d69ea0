//! Streaming SHA-256 for downloaded files.

use crate::error::{FetchError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Read buffer size.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Compute a file's SHA-256 as lowercase hex.
pub fn compute_sha256(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| FetchError::io_with_path(e, path))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| FetchError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify a file's SHA-256 matches `expected` (hex, any case).
///
/// # Returns
///
/// Ok(()) if hash matches, `ChecksumMismatch` otherwise.
pub fn verify_sha256(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    let actual = compute_sha256(path)?;
    let expected_lower = expected.trim().to_lowercase();

    if actual == expected_lower {
        Ok(())
    } else {
        Err(FetchError::ChecksumMismatch {
            expected: expected_lower,
            actual,
        })
    }
}

/// [`verify_sha256`] on the blocking pool.
pub async fn verify_sha256_async(path: PathBuf, expected: String) -> Result<()> {
    tokio::task::spawn_blocking(move || verify_sha256(&path, &expected))
        .await
        .map_err(|e| FetchError::Io {
            message: format!("Checksum task failed: {}", e),
            path: None,
            source: None,
        })?
}
