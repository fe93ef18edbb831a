//! Configuration types for range-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Concurrency above which a warning is logged (servers tend to throttle)
pub const WARNING_CONCURRENCY: usize = 15;

/// Transfer behaviour for a single download (probe limits, chunking, HTTP client)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Largest content length a probe may report (default: 10 GiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Number of byte ranges a download is split into (default: 10)
    #[serde(default = "default_chunk_count")]
    pub chunk_count: usize,

    /// Maximum ranges in flight per download (None = one worker per range)
    #[serde(default)]
    pub chunk_concurrency: Option<usize>,

    /// Connect timeout for the HTTP client (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_ms_serde")]
    pub connect_timeout: Duration,

    /// Overall per-request timeout (None = unlimited, large bodies may take long)
    #[serde(default, with = "optional_duration_ms_serde")]
    pub request_timeout: Option<Duration>,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            chunk_count: default_chunk_count(),
            chunk_concurrency: None,
            connect_timeout: default_connect_timeout(),
            request_timeout: None,
            user_agent: default_user_agent(),
        }
    }
}

impl DownloadConfig {
    /// Effective number of ranges in flight for a download split into `chunks` ranges
    pub fn effective_chunk_concurrency(&self, chunks: usize) -> usize {
        self.chunk_concurrency.unwrap_or(chunks).max(1)
    }
}

/// How the delay between retries grows
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Backoff {
    /// `initial_delay * attempt`
    #[default]
    Linear,
    /// `initial_delay * multiplier^(attempt - 1)`
    Exponential {
        /// Growth factor applied per attempt
        multiplier: f64,
    },
}

/// Retry configuration for transient range failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 2, so three attempts in total)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay before the first retry (default: 500 ms)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Delay growth strategy (default: linear)
    #[serde(default)]
    pub backoff: Backoff,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff: Backoff::Linear,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Total number of attempts, including the first one
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait before retry number `attempt` (1-based), never above `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Linear => self.initial_delay.saturating_mul(attempt),
            Backoff::Exponential { multiplier } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let secs = self.initial_delay.as_secs_f64() * multiplier.powi(exponent);
                // Overflow, NaN and negative growth all fall back to the cap
                Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Batch pipeline settings (pools, output layout, verification)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Directory downloaded files are written to (default: "Downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Concurrent identifier resolutions and probes (default: 64)
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Concurrent downloads and hash checks (default: 10)
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,

    /// File extension appended to each identifier (default: "bin")
    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    /// Verify existing and downloaded files against the hash manifest (default: true)
    #[serde(default = "default_true")]
    pub verify_hashes: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            fetch_concurrency: default_fetch_concurrency(),
            download_concurrency: default_download_concurrency(),
            file_extension: default_file_extension(),
            verify_hashes: true,
        }
    }
}

impl BatchConfig {
    /// Path a given identifier is downloaded to
    pub fn file_path(&self, id: &impl std::fmt::Display) -> PathBuf {
        self.output_dir.join(format!("{}.{}", id, self.file_extension))
    }
}

/// Main configuration for range-dl
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Per-download transfer settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry policy for byte ranges
    #[serde(default)]
    pub retry: RetryConfig,

    /// Batch pipeline settings
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Config {
    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch.download_concurrency < 1 {
            return Err(config_error(
                "concurrency must be at least 1",
                "download_concurrency",
            ));
        }
        if self.batch.fetch_concurrency < 1 {
            return Err(config_error(
                "fetch concurrency must be at least 1",
                "fetch_concurrency",
            ));
        }
        if self.download.chunk_count < 1 {
            return Err(config_error("chunk count must be at least 1", "chunk_count"));
        }
        if self.download.chunk_concurrency == Some(0) {
            return Err(config_error(
                "chunk concurrency must be at least 1",
                "chunk_concurrency",
            ));
        }
        if let Backoff::Exponential { multiplier } = self.retry.backoff {
            if !(multiplier.is_finite() && multiplier > 0.0) {
                return Err(config_error(
                    "backoff multiplier must be a positive number",
                    "multiplier",
                ));
            }
        }
        if self.download.max_file_size == 0 {
            return Err(config_error(
                "maximum file size must be positive",
                "max_file_size",
            ));
        }
        if self.batch.download_concurrency > WARNING_CONCURRENCY {
            tracing::warn!(
                concurrency = self.batch.download_concurrency,
                "High concurrency may cause issues, consider using a lower value"
            );
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

// Default value functions
fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}

fn default_chunk_count() -> usize {
    10
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("range-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("Downloads")
}

fn default_fetch_concurrency() -> usize {
    64
}

fn default_download_concurrency() -> usize {
    10
}

fn default_file_extension() -> String {
    "bin".to_string()
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

// Optional Duration serialization helper (milliseconds)
mod optional_duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}
