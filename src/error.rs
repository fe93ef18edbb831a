//! Error types for range-dl
//!
//! This module provides the error taxonomy for the library:
//! - Transfer failures raised by the range downloader ([`DownloadError`])
//! - Destination preflight failures (path escape, disk space)
//! - Hashing and verification failures
//! - Executor cancellation, kept distinguishable from genuine failures

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for range-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for range-dl
///
/// Each variant carries enough context (paths, byte counts, range bounds) to
/// diagnose a failure without re-running the operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk_count")
        key: Option<String>,
    },

    /// Transfer-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Destination resolves outside of the base directory
    #[error("destination {path} is outside of {base}")]
    PathEscape {
        /// The resolved destination path
        path: PathBuf,
        /// The resolved base directory
        base: PathBuf,
    },

    /// Insufficient disk space
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the operation
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// File to hash could not be found
    #[error("file not found: {}", path.display())]
    FileNotFound {
        /// The missing file
        path: PathBuf,
    },

    /// Reading a local file failed
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed {
        /// The file being read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writing a local file failed
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        /// The file being written
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Content digest did not match the trusted value
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        /// The verified file
        path: PathBuf,
        /// The trusted digest
        expected: String,
        /// The digest computed from the file
        actual: String,
    },

    /// Work was skipped or abandoned because a sibling failed or the caller cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// A worker task panicked or was aborted
    #[error("worker task failed: {0}")]
    TaskFailed(String),

    /// Resolving an identifier to a URL failed
    #[error("failed to resolve {id}: {reason}")]
    Resolve {
        /// The identifier that could not be resolved
        id: String,
        /// Why resolution failed
        reason: String,
    },

    /// Hash manifest does not cover the requested identifiers
    #[error("hash manifest does not match requested items: {0}")]
    ManifestMismatch(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True when this error only reports cancellation, not a failure of its own
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Transfer errors raised while probing or fetching a remote resource
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The URL could not be parsed
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL
        url: String,
        /// The parse failure
        reason: String,
    },

    /// The metadata probe did not succeed
    #[error("probe of {url} failed: {reason}")]
    ProbeFailed {
        /// The probed URL
        url: String,
        /// Transport error or unexpected status
        reason: String,
    },

    /// The remote reported a missing, non-positive or oversized length
    #[error("invalid content length for {url}: {size:?} (maximum {max} bytes)")]
    InvalidSize {
        /// The probed URL
        url: String,
        /// The reported length, if any was parseable
        size: Option<i64>,
        /// The configured maximum
        max: u64,
    },

    /// A ranged request was not answered with partial content for that exact range
    #[error("expected 206 for range {start}-{end}, got {status}")]
    RangeRejected {
        /// First byte of the requested range
        start: u64,
        /// Last byte of the requested range (inclusive)
        end: u64,
        /// Status code and, if relevant, the offending Content-Range
        status: String,
    },

    /// A range kept failing until the retry ceiling was reached
    #[error("chunk {start}-{end} failed after {attempts} attempts: {source}")]
    ChunkFailed {
        /// First byte of the failed range
        start: u64,
        /// Last byte of the failed range (inclusive)
        end: u64,
        /// Number of attempts made
        attempts: u32,
        /// The last attempt's error
        #[source]
        source: Box<Error>,
    },

    /// The body delivered a different number of bytes than expected
    #[error("length mismatch for {url}: expected {expected} bytes, received {actual}")]
    LengthMismatch {
        /// The fetched URL
        url: String,
        /// Bytes expected for the range or whole resource
        expected: u64,
        /// Bytes actually delivered (so far)
        actual: u64,
    },

    /// A full (non-ranged) transfer returned an unexpected status
    #[error("download of {url} failed with status {status}")]
    UnexpectedStatus {
        /// The fetched URL
        url: String,
        /// The returned status code
        status: u16,
    },

    /// Reading the response body failed mid-transfer
    #[error("reading body of {url} failed: {reason}")]
    BodyRead {
        /// The fetched URL
        url: String,
        /// The transport error
        reason: String,
    },
}
