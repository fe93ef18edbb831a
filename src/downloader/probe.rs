//! Metadata probe: content length and byte-range support from a `HEAD` request.

use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap};

use crate::error::{DownloadError, Result};

/// What a `HEAD` request revealed about a remote resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeResult {
    /// Validated content length in bytes (always positive)
    pub content_length: u64,
    /// Whether the server advertised `Accept-Ranges: bytes`
    pub accepts_ranges: bool,
}

/// Issue a `HEAD` request and validate the reported length against `max_size`.
///
/// The `Content-Length` header is parsed directly because reqwest reports the
/// (empty) body size for `HEAD` responses rather than the advertised length.
pub(crate) async fn probe(
    client: &reqwest::Client,
    url: &str,
    max_size: u64,
) -> Result<ProbeResult> {
    let response = client
        .head(url)
        .send()
        .await
        .map_err(|e| DownloadError::ProbeFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(DownloadError::ProbeFailed {
            url: url.to_string(),
            reason: format!("unexpected status {}", status),
        }
        .into());
    }

    let headers = response.headers();
    let content_length = validate_length(url, parse_content_length(headers), max_size)?;
    let accepts_ranges = advertises_byte_ranges(headers);

    tracing::debug!(
        url = %url,
        content_length,
        accepts_ranges,
        "Probed remote resource"
    );

    Ok(ProbeResult {
        content_length,
        accepts_ranges,
    })
}

fn parse_content_length(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()
}

fn advertises_byte_ranges(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_RANGES)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
}

fn validate_length(url: &str, size: Option<i64>, max: u64) -> Result<u64> {
    match size {
        Some(len) if len > 0 && (len as u64) <= max => Ok(len as u64),
        _ => Err(DownloadError::InvalidSize {
            url: url.to_string(),
            size,
            max,
        }
        .into()),
    }
}
