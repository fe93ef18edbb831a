//! Content digests for downloaded files.
//!
//! A [`Digest`] is the SHA-1 of a file's full byte stream, encoded as RFC 4648
//! base32 (upper-case alphabet) with the `=` padding stripped. It identifies
//! content and catches corruption; it is not a security boundary.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};

use crate::error::{Error, Result};

/// Buffer size for reading files during digest calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Base32 (no padding) SHA-1 fingerprint of some content
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Wrap an already-encoded digest, e.g. one read from a trusted manifest
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Digest of an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self::from_hasher(hasher)
    }

    fn from_hasher(hasher: Sha1) -> Self {
        Self(BASE32_NOPAD.encode(&hasher.finalize()))
    }

    /// The encoded digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Digest {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Digest {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Calculate the digest of a file, streaming it in fixed-size buffers.
///
/// # Errors
///
/// [`Error::FileNotFound`] if the file does not exist, [`Error::ReadFailed`]
/// if it cannot be opened for another reason or reading is interrupted.
pub fn calculate_file_digest(path: &Path) -> Result<Digest> {
    let mut file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => Error::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = match file.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(Error::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Digest::from_hasher(hasher))
}

/// Async wrapper around [`calculate_file_digest`] that hashes on the blocking pool.
pub async fn digest_file(path: &Path) -> Result<Digest> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || calculate_file_digest(&owned))
        .await
        .map_err(|e| Error::TaskFailed(format!("digest task for {}: {}", path.display(), e)))?
}

/// Verify that a file matches an expected digest.
pub async fn verify_digest(path: &Path, expected: &Digest) -> Result<()> {
    let actual = digest_file(path).await?;
    if &actual != expected {
        return Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}
