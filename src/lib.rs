//! # range-dl
//!
//! Bounded-concurrency task execution and chunked, integrity-checked HTTP downloads.
//!
//! ## Design Philosophy
//!
//! range-dl is designed to be:
//! - **Bounded** - Every fan-out runs under an explicit concurrency cap
//! - **Fail-fast** - The first failure cancels its siblings and is returned on its own
//! - **Safe on disk** - Destinations are confined to a base directory and preallocated
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use range_dl::{Config, DownloadSpec, RangeDownloader};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let downloader = RangeDownloader::new(&config)?;
//!
//!     let spec = DownloadSpec::new(
//!         "https://cdn.example.com/video.mp4",
//!         "Downloads/video.mp4",
//!         "Downloads",
//!         config.download.chunk_count,
//!     );
//!     let outcome = downloader
//!         .download(&spec, &CancellationToken::new(), None)
//!         .await?;
//!     println!("Downloaded {} bytes ({:?})", outcome.bytes, outcome.mode);
//!
//!     let digest = range_dl::checksum::digest_file(&spec.destination).await?;
//!     println!("Digest: {}", digest);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Batch pipeline: resolve, plan, download and verify many items
pub mod batch;
/// Content digests
pub mod checksum;
/// Configuration types
pub mod config;
/// Destination path validation, disk space checks and preallocation
pub mod destination;
/// Chunked HTTP range downloader
pub mod downloader;
/// Error types
pub mod error;
/// Bounded concurrent executor
pub mod executor;
/// Retry logic with configurable backoff
pub mod retry;
/// Core types and data structures
pub mod types;
/// Path, positional I/O and disk space helpers
pub mod utils;

// Re-export commonly used types
pub use batch::{BatchDownloader, BatchPlan, HashManifest, ResourceResolver, TemplateResolver};
pub use checksum::{Digest, calculate_file_digest, digest_file, verify_digest};
pub use config::{BatchConfig, Config, DownloadConfig, RetryConfig};
pub use destination::prepare_destination;
pub use downloader::{ProbeResult, RangeDownloader};
pub use error::{DownloadError, Error, Result};
pub use executor::{BoundedExecutor, execute, run_all};
pub use types::{
    ByteRange, DownloadOutcome, DownloadSpec, ProgressSink, SharedProgress, TransferMode,
    partition_ranges,
};
