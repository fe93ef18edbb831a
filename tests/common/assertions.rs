//! Custom test assertions for downloaded files

use range_dl::{Digest, calculate_file_digest};
use std::path::Path;

/// Assert that `path` holds exactly `expected`, comparing digests first for a readable failure
pub fn assert_file_content(path: &Path, expected: &[u8]) {
    let actual = calculate_file_digest(path)
        .unwrap_or_else(|e| panic!("Failed to hash {}: {}", path.display(), e));
    assert_eq!(
        actual,
        Digest::of_bytes(expected),
        "digest mismatch for {}",
        path.display()
    );

    let len = std::fs::metadata(path)
        .unwrap_or_else(|e| panic!("Failed to stat {}: {}", path.display(), e))
        .len();
    assert_eq!(len, expected.len() as u64, "size mismatch for {}", path.display());
}
