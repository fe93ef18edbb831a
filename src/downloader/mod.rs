//! Chunked HTTP range downloader.
//!
//! A download is organized in four steps, each in its own submodule where it
//! carries real logic:
//! - [`probe`] - `HEAD` request for content length and range support
//! - allocation - destination check and preallocation via [`crate::destination`]
//! - fan-out decision - chunked when ranges are supported and more than one chunk is requested
//! - [`transfer`] - ranged fetches with per-range retry, or one plain stream

mod probe;
mod transfer;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use probe::ProbeResult;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{Config, DownloadConfig, RetryConfig};
use crate::destination::{prepare_destination, resolve_destination};
use crate::error::{DownloadError, Error, Result};
use crate::executor::BoundedExecutor;
use crate::types::{DownloadOutcome, DownloadSpec, SharedProgress, TransferMode, partition_ranges};
use crate::utils::format_size;
use transfer::{ProgressTracker, TransferContext};

/// Downloads remote resources into local files, splitting large bodies into parallel ranges
///
/// Cheap to clone: the underlying HTTP client shares its connection pool.
#[derive(Clone, Debug)]
pub struct RangeDownloader {
    client: reqwest::Client,
    config: DownloadConfig,
    retry: RetryConfig,
}

impl RangeDownloader {
    /// Create a downloader with an HTTP client built from `config`
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.download.connect_timeout)
            .user_agent(config.download.user_agent.clone());
        if let Some(timeout) = config.download.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self::with_client(client, config))
    }

    /// Create a downloader around an existing client
    pub fn with_client(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            config: config.download.clone(),
            retry: config.retry.clone(),
        }
    }

    /// Transfer settings in use
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Probe `url` for its content length and byte-range support
    pub async fn probe(&self, url: &str) -> Result<ProbeResult> {
        parse_url(url)?;
        probe::probe(&self.client, url, self.config.max_file_size).await
    }

    /// Download `spec.url` into `spec.destination`.
    ///
    /// The destination is checked against `spec.base_dir` before any request
    /// is made, then preallocated to the probed length. Bodies are fetched in
    /// `spec.chunk_count` parallel ranges when the server supports them and
    /// more than one chunk was asked for, otherwise in a single stream.
    ///
    /// On failure the destination may be left at full size with partial
    /// content; verify it with [`crate::checksum::verify_digest`] before use.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] when `cancel` fires, the first failing
    /// range's error for chunked transfers, or the probe/preflight error.
    pub async fn download(
        &self,
        spec: &DownloadSpec,
        cancel: &CancellationToken,
        progress: Option<SharedProgress>,
    ) -> Result<DownloadOutcome> {
        parse_url(&spec.url)?;
        resolve_destination(&spec.destination, &spec.base_dir)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let probed = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            probed = probe::probe(&self.client, &spec.url, self.config.max_file_size) => probed?,
        };
        let length = probed.content_length;

        let (destination, base_dir) = (spec.destination.clone(), spec.base_dir.clone());
        let file =
            tokio::task::spawn_blocking(move || prepare_destination(&destination, &base_dir, length))
                .await
                .map_err(|e| Error::TaskFailed(format!("preallocation task failed: {}", e)))??;

        let context = Arc::new(TransferContext {
            client: self.client.clone(),
            url: spec.url.clone(),
            file: Arc::new(file),
            path: spec.destination.clone(),
            retry: self.retry.clone(),
            progress: ProgressTracker::new(length, progress),
        });

        let mode = if probed.accepts_ranges && spec.chunk_count > 1 {
            let chunks = self.download_chunked(&context, length, spec.chunk_count, cancel).await?;
            TransferMode::Chunked { chunks }
        } else {
            tracing::debug!(
                url = %spec.url,
                accepts_ranges = probed.accepts_ranges,
                chunk_count = spec.chunk_count,
                "Using single-stream transfer"
            );
            context.fetch_whole(length, cancel).await?;
            TransferMode::SingleStream
        };

        tracing::info!(
            url = %spec.url,
            path = %spec.destination.display(),
            size = %format_size(length),
            ?mode,
            "Download complete"
        );

        Ok(DownloadOutcome {
            bytes: length,
            mode,
        })
    }

    async fn download_chunked(
        &self,
        context: &Arc<TransferContext>,
        length: u64,
        chunk_count: usize,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let ranges = partition_ranges(length, chunk_count);
        let chunks = ranges.len();
        let concurrency = self.config.effective_chunk_concurrency(chunks);

        tracing::debug!(
            url = %context.url,
            chunks,
            concurrency,
            "Starting chunked transfer"
        );

        let ctx = Arc::clone(context);
        BoundedExecutor::new(concurrency)
            .with_parent(cancel.clone())
            .run_all(ranges, move |range, token| {
                let ctx = Arc::clone(&ctx);
                async move { ctx.fetch_range(range, &token).await }
            })
            .await?;
        Ok(chunks)
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| {
        Error::Download(DownloadError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
    })
}
