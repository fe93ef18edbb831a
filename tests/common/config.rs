//! Test configuration helpers: fast retries and scratch output directories

use range_dl::config::{Config, RetryConfig};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Config with millisecond retry delays, writing into `output_dir`
pub fn fast_config(output_dir: &Path) -> Config {
    let mut config = Config {
        retry: RetryConfig {
            initial_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        },
        ..Config::default()
    };
    config.batch.output_dir = output_dir.to_path_buf();
    config.batch.file_extension = "mp4".to_string();
    config
}

/// Fresh scratch directory plus a config pointing at its `Downloads` subdirectory
pub fn scratch_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().unwrap_or_else(|e| panic!("Failed to create temp dir: {}", e));
    let config = fast_config(&temp_dir.path().join("Downloads"));
    (config, temp_dir)
}
