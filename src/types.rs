//! Core types shared by the executor, downloader and batch pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Inclusive byte window `[start, end]` into a remote resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte offset
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a range covering `start..=end`
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Ranges are never empty; present for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for the HTTP `Range` request header
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// Whether a `Content-Range` response header names exactly this range
    ///
    /// Accepts `bytes start-end/total` and `bytes start-end/*`.
    pub fn matches_content_range(&self, header: &str) -> bool {
        let Some(spec) = header.trim().strip_prefix("bytes") else {
            return false;
        };
        let Some((span, _total)) = spec.trim().split_once('/') else {
            return false;
        };
        let Some((start, end)) = span.split_once('-') else {
            return false;
        };
        matches!(
            (start.trim().parse::<u64>(), end.trim().parse::<u64>()),
            (Ok(s), Ok(e)) if s == self.start && e == self.end
        )
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Split `[0, total)` into `chunks` contiguous, disjoint ranges.
///
/// Every range but the last has `total / chunks` bytes; the last absorbs the
/// remainder. `chunks` is clamped to `1..=total` so no range is ever empty.
/// Returns an empty vector when `total` is zero.
///
/// # Examples
///
/// ```
/// use range_dl::types::{ByteRange, partition_ranges};
///
/// let ranges = partition_ranges(10, 3);
/// assert_eq!(
///     ranges,
///     vec![ByteRange::new(0, 2), ByteRange::new(3, 5), ByteRange::new(6, 9)]
/// );
/// ```
pub fn partition_ranges(total: u64, chunks: usize) -> Vec<ByteRange> {
    if total == 0 {
        return Vec::new();
    }
    let chunks = (chunks.max(1) as u64).min(total);
    let part = total / chunks;

    (0..chunks)
        .map(|i| {
            let start = i * part;
            let end = if i == chunks - 1 {
                total - 1
            } else {
                start + part - 1
            };
            ByteRange::new(start, end)
        })
        .collect()
}

/// One download: where from, where to, confined to which directory, in how many ranges
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSpec {
    /// Remote resource URL
    pub url: String,
    /// Destination file path
    pub destination: PathBuf,
    /// Directory the destination must stay inside
    pub base_dir: PathBuf,
    /// Number of byte ranges to request in parallel
    pub chunk_count: usize,
}

impl DownloadSpec {
    /// Create a new download spec
    pub fn new(
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
        chunk_count: usize,
    ) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            base_dir: base_dir.into(),
            chunk_count,
        }
    }
}

/// How a download's body was transferred
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Parallel ranged requests
    Chunked {
        /// Number of ranges requested
        chunks: usize,
    },
    /// One full GET
    SingleStream,
}

/// Result of a successful download
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    /// Final file size (the probed content length)
    pub bytes: u64,
    /// How the body was fetched
    pub mode: TransferMode,
}

/// Receives progress updates
///
/// `bytes_done` never decreases between calls for one transfer, even when a
/// range is retried from its start.
pub trait ProgressSink: Send + Sync {
    /// Called as bytes land on disk
    fn on_progress(&self, bytes_done: u64, total: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_progress(&self, bytes_done: u64, total: u64) {
        self(bytes_done, total)
    }
}

/// Shared handle to a progress sink
pub type SharedProgress = Arc<dyn ProgressSink>;
