//! Body transfer: ranged fetches with per-range retry, and the single-stream fallback.
//!
//! Both paths stream the response body into a preallocated file through
//! positional writes, so ranges can land in any order and a retried range
//! simply overwrites its own window.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{DownloadError, Error, Result};
use crate::retry::{IsRetryable, download_with_retry};
use crate::types::{ByteRange, SharedProgress};
use crate::utils::write_all_at;

/// Largest amount of body data held in memory before it is written out (64KB).
pub(crate) const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Cumulative byte counter for one download, forwarding to an optional sink
///
/// The count is updated and reported under one lock so concurrent range
/// workers can never deliver totals to the sink out of order.
pub(crate) struct ProgressTracker {
    done: Mutex<u64>,
    total: u64,
    sink: Option<SharedProgress>,
}

impl ProgressTracker {
    pub(crate) fn new(total: u64, sink: Option<SharedProgress>) -> Self {
        Self {
            done: Mutex::new(0),
            total,
            sink,
        }
    }

    fn advance(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let mut done = self.done.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *done += bytes;
        if let Some(sink) = &self.sink {
            sink.on_progress((*done).min(self.total), self.total);
        }
    }

    #[cfg(test)]
    fn done(&self) -> u64 {
        *self.done.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Everything a transfer needs, shared by all range workers of one download
pub(crate) struct TransferContext {
    pub(crate) client: reqwest::Client,
    pub(crate) url: String,
    pub(crate) file: Arc<File>,
    pub(crate) path: PathBuf,
    pub(crate) retry: RetryConfig,
    pub(crate) progress: ProgressTracker,
}

impl TransferContext {
    /// Fetch one range, retrying transient failures from the range start.
    ///
    /// Exhausted retries become [`DownloadError::ChunkFailed`]; local write
    /// failures and cancellation are returned as they are.
    pub(crate) async fn fetch_range(
        &self,
        range: ByteRange,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Bytes of this range already reported, so a retry never moves progress backwards
        let high_water = AtomicU64::new(0);
        let attempts = AtomicU32::new(0);

        let result = download_with_retry(&self.retry, cancel, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.fetch_range_once(range, &high_water, cancel)
        })
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(start = range.start, end = range.end, "Range complete");
                Ok(())
            }
            Err(_) if cancel.is_cancelled() => Err(Error::Cancelled),
            Err(e) if e.is_retryable() => {
                let attempts = attempts.load(Ordering::Relaxed);
                tracing::error!(
                    url = %self.url,
                    start = range.start,
                    end = range.end,
                    attempts,
                    error = %e,
                    "Range failed after all retries"
                );
                Err(DownloadError::ChunkFailed {
                    start: range.start,
                    end: range.end,
                    attempts,
                    source: Box::new(e),
                }
                .into())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_range_once(
        &self,
        range: ByteRange,
        high_water: &AtomicU64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tracing::debug!(start = range.start, end = range.end, "Requesting range");

        let request = self
            .client
            .get(&self.url)
            .header(RANGE, range.header_value())
            .send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::RangeRejected {
                start: range.start,
                end: range.end,
                status: status.to_string(),
            }
            .into());
        }

        if let Some(value) = response.headers().get(CONTENT_RANGE) {
            let content_range = value.to_str().unwrap_or_default();
            if !range.matches_content_range(content_range) {
                return Err(DownloadError::RangeRejected {
                    start: range.start,
                    end: range.end,
                    status: format!("{} with Content-Range '{}'", status, content_range),
                }
                .into());
            }
        }

        self.write_body(response, range.start, range.len(), cancel, |written| {
            let previous = high_water.fetch_max(written, Ordering::Relaxed);
            if written > previous {
                self.progress.advance(written - previous);
            }
        })
        .await
    }

    /// One plain `GET`, copied to the file from offset 0. Not retried.
    pub(crate) async fn fetch_whole(&self, length: u64, cancel: &CancellationToken) -> Result<()> {
        tracing::debug!(url = %self.url, "Requesting full body");

        let request = self.client.get(&self.url).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DownloadError::UnexpectedStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        let mut reported = 0;
        self.write_body(response, 0, length, cancel, |written| {
            self.progress.advance(written - reported);
            reported = written;
        })
        .await
    }

    /// Stream `response` into the file window `[offset, offset + expected)`.
    ///
    /// `on_written` receives the number of bytes of this window on disk after
    /// each flush. A body longer than the window is rejected before the
    /// excess is written; a shorter one is rejected once it ends.
    async fn write_body(
        &self,
        response: reqwest::Response,
        offset: u64,
        expected: u64,
        cancel: &CancellationToken,
        mut on_written: impl FnMut(u64),
    ) -> Result<()> {
        let mut stream = response.bytes_stream();
        let mut buffer = Vec::with_capacity(WRITE_BUFFER_SIZE);
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| DownloadError::BodyRead {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

            let received = written + buffer.len() as u64 + chunk.len() as u64;
            if received > expected {
                return Err(DownloadError::LengthMismatch {
                    url: self.url.clone(),
                    expected,
                    actual: received,
                }
                .into());
            }

            let mut rest = &chunk[..];
            while !rest.is_empty() {
                let take = rest.len().min(WRITE_BUFFER_SIZE - buffer.len());
                buffer.extend_from_slice(&rest[..take]);
                rest = &rest[take..];

                if buffer.len() == WRITE_BUFFER_SIZE {
                    written += self.flush(&mut buffer, offset + written).await?;
                    on_written(written);
                }
            }
        }

        if !buffer.is_empty() {
            written += self.flush(&mut buffer, offset + written).await?;
            on_written(written);
        }

        if written != expected {
            return Err(DownloadError::LengthMismatch {
                url: self.url.clone(),
                expected,
                actual: written,
            }
            .into());
        }
        Ok(())
    }

    /// Write the buffered bytes at `at` on the blocking pool and empty the buffer
    async fn flush(&self, buffer: &mut Vec<u8>, at: u64) -> Result<u64> {
        let data = std::mem::replace(buffer, Vec::with_capacity(WRITE_BUFFER_SIZE));
        let len = data.len() as u64;
        let file = Arc::clone(&self.file);

        tokio::task::spawn_blocking(move || write_all_at(&file, &data, at))
            .await
            .map_err(|e| Error::TaskFailed(format!("write task failed: {}", e)))?
            .map_err(|e| Error::WriteFailed {
                path: self.path.clone(),
                source: e,
            })?;

        Ok(len)
    }
}
