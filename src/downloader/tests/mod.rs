use super::*;
use crate::checksum::{Digest, calculate_file_digest};
use crate::downloader::test_helpers::*;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::MockServer;


/// Download `route` from `server` into `dir/name` with `chunks` ranges
async fn fetch(
    downloader: &RangeDownloader,
    server: &MockServer,
    route: &str,
    dir: &Path,
    name: &str,
    chunks: usize,
) -> Result<DownloadOutcome> {
    let spec = DownloadSpec::new(
        format!("{}{}", server.uri(), route),
        dir.join(name),
        dir,
        chunks,
    );
    downloader
        .download(&spec, &CancellationToken::new(), None)
        .await
}

fn downloader() -> RangeDownloader {
    RangeDownloader::new(&test_config()).unwrap()
}
