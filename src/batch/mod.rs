//! Batch pipeline: many identifiers, each resolved to a URL and downloaded once.
//!
//! A batch runs in two phases:
//! - [`BatchDownloader::plan`] resolves every identifier and probes its size
//!   (fetch pool), finds files already in the output directory, verifies them
//!   against the [`HashManifest`] (deleting mismatches) and compares the
//!   remaining bytes with the free space on the output volume.
//! - [`BatchDownloader::download`] fetches what is left (download pool), each
//!   item with its own range fan-out, and verifies every finished file.
//!
//! Whether to proceed when [`BatchPlan::has_enough_space`] is false is left to
//! the caller; [`BatchDownloader::run`] refuses.

mod manifest;

pub use manifest::{DEFAULT_MANIFEST_PATH, HashManifest};

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::checksum::{digest_file, verify_digest};
use crate::config::{BatchConfig, Config};
use crate::destination::check_free_space;
use crate::downloader::RangeDownloader;
use crate::error::{Error, Result};
use crate::executor::BoundedExecutor;
use crate::types::{DownloadOutcome, DownloadSpec, ProgressSink, SharedProgress};
use crate::utils::{available_space, format_size};

/// Identifier usable as a batch key: hashable, printable as a file stem and parseable back
pub trait BatchKey: Eq + Hash + Clone + Display + FromStr + Send + Sync + 'static {}

impl<T> BatchKey for T where T: Eq + Hash + Clone + Display + FromStr + Send + Sync + 'static {}

/// Turns an identifier into the URL its content is downloaded from
///
/// Called once per item while planning and again right before the download,
/// so implementations that hand out short-lived URLs stay valid.
#[async_trait]
pub trait ResourceResolver<K>: Send + Sync {
    /// Resolve `id` to a URL, or fail with [`Error::Resolve`]
    async fn resolve(&self, id: &K) -> Result<String>;
}

/// Resolves identifiers by substituting them into a URL template containing `{id}`
#[derive(Clone, Debug)]
pub struct TemplateResolver {
    template: String,
}

impl TemplateResolver {
    /// Resolver for `template`, e.g. `https://cdn.example.com/lives/{id}.mp4`
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl<K: Display + Sync> ResourceResolver<K> for TemplateResolver {
    async fn resolve(&self, id: &K) -> Result<String> {
        if !self.template.contains("{id}") {
            return Err(Error::Resolve {
                id: id.to_string(),
                reason: format!("template '{}' has no {{id}} placeholder", self.template),
            });
        }
        Ok(self.template.replace("{id}", &id.to_string()))
    }
}

/// What a batch still has to do, computed by [`BatchDownloader::plan`]
#[derive(Clone, Debug)]
pub struct BatchPlan<K: BatchKey> {
    /// Identifiers to download, in request order
    pub pending: Vec<K>,
    /// Identifiers whose file already exists and passed verification
    pub skipped: Vec<K>,
    /// Probed content length of every requested identifier
    pub sizes: HashMap<K, u64>,
    /// Bytes across all requested identifiers
    pub total_bytes: u64,
    /// Bytes still to download
    pub remaining_bytes: u64,
    /// Free space on the output volume when the plan was made
    pub available_space: u64,
}

impl<K: BatchKey> BatchPlan<K> {
    /// Whether the output volume had room for the remaining bytes
    pub fn has_enough_space(&self) -> bool {
        self.available_space >= self.remaining_bytes
    }

    /// Fail with [`Error::InsufficientSpace`] unless the remaining bytes fit
    pub fn ensure_space(&self) -> Result<()> {
        check_free_space(self.remaining_bytes, self.available_space)
    }

    /// Whether nothing is left to download
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Batch-wide byte counter fed by every item's progress
struct BatchProgress {
    done: std::sync::Mutex<u64>,
    total: u64,
    sink: SharedProgress,
}

impl BatchProgress {
    fn advance(&self, bytes: u64) {
        let mut done = self.done.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *done += bytes;
        self.sink.on_progress((*done).min(self.total), self.total);
    }
}

/// Forwards one item's cumulative progress into the batch counter as deltas
struct ItemProgress {
    reported: AtomicU64,
    batch: Arc<BatchProgress>,
}

impl ProgressSink for ItemProgress {
    fn on_progress(&self, bytes_done: u64, _total: u64) {
        let previous = self.reported.fetch_max(bytes_done, Ordering::Relaxed);
        if bytes_done > previous {
            self.batch.advance(bytes_done - previous);
        }
    }
}

/// Resolves, plans and downloads a batch of identifiers
pub struct BatchDownloader<K, R> {
    downloader: RangeDownloader,
    resolver: Arc<R>,
    config: BatchConfig,
    chunk_count: usize,
    cancel: CancellationToken,
    _key: PhantomData<fn() -> K>,
}

impl<K, R> BatchDownloader<K, R>
where
    K: BatchKey,
    R: ResourceResolver<K> + 'static,
{
    /// Create a batch downloader with its own HTTP client
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the HTTP client cannot be created
    pub fn new(config: &Config, resolver: R) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_downloader(
            RangeDownloader::new(config)?,
            config,
            resolver,
        ))
    }

    /// Create a batch downloader around an existing [`RangeDownloader`]
    pub fn with_downloader(downloader: RangeDownloader, config: &Config, resolver: R) -> Self {
        Self {
            downloader,
            resolver: Arc::new(resolver),
            config: config.batch.clone(),
            chunk_count: config.download.chunk_count,
            cancel: CancellationToken::new(),
            _key: PhantomData,
        }
    }

    /// Tie every pool this batch starts to `token`
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the batch when cancelled
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Local path `id` is downloaded to
    pub fn file_path(&self, id: &K) -> PathBuf {
        self.config.file_path(id)
    }

    /// Resolve and probe every identifier, returning each one's content length.
    ///
    /// Runs at most `fetch_concurrency` probes at once; the first failure
    /// (resolution, probe, or an invalid size) aborts the whole step.
    pub async fn fetch_sizes(&self, ids: &[K]) -> Result<HashMap<K, u64>> {
        tracing::info!(items = ids.len(), "Fetching sizes");

        let resolver = Arc::clone(&self.resolver);
        let downloader = self.downloader.clone();
        let sizes = BoundedExecutor::new(self.config.fetch_concurrency)
            .with_parent(self.cancel.clone())
            .execute(ids.to_vec(), move |id, token| {
                let resolver = Arc::clone(&resolver);
                let downloader = downloader.clone();
                async move {
                    let url = resolver.resolve(&id).await?;
                    let probed = tokio::select! {
                        _ = token.cancelled() => return Err(Error::Cancelled),
                        probed = downloader.probe(&url) => probed?,
                    };
                    Ok(probed.content_length)
                }
            })
            .await?;

        let total: u64 = sizes.values().sum();
        tracing::info!(items = sizes.len(), total = %format_size(total), "Fetched sizes");
        Ok(sizes)
    }

    /// Files in the output directory named `<id>.<extension>` for a requested identifier.
    ///
    /// Directories, other extensions and stems that are not the canonical
    /// form of a requested identifier are ignored. A missing output directory
    /// yields no files. Results follow the order of `ids`.
    pub async fn existing_files(&self, ids: &[K]) -> Result<Vec<K>> {
        let wanted: HashSet<&K> = ids.iter().collect();
        let suffix = format!(".{}", self.config.file_extension);

        let mut dir = match tokio::fs::read_dir(&self.config.output_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::ReadFailed {
                    path: self.config.output_dir.clone(),
                    source: e,
                });
            }
        };

        let mut found = HashSet::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(suffix.as_str())) else {
                continue;
            };
            let Ok(id) = stem.parse::<K>() else {
                continue;
            };
            // "007" parses like "7" but is not the file this batch would write
            if id.to_string() == stem && wanted.contains(&id) {
                found.insert(id);
            }
        }

        Ok(ids.iter().filter(|id| found.contains(*id)).cloned().collect())
    }

    /// Hash existing files against `manifest`, deleting those that do not match.
    ///
    /// Returns the identifiers whose files were kept. With verification
    /// disabled every existing file is kept unchecked.
    pub async fn verify_existing(
        &self,
        existing: Vec<K>,
        manifest: Option<&HashManifest>,
    ) -> Result<Vec<K>> {
        if !self.config.verify_hashes {
            tracing::info!(
                files = existing.len(),
                "Hash verification disabled, keeping existing files"
            );
            return Ok(existing);
        }
        let manifest = Arc::new(self.require_manifest(manifest)?.clone());
        let checked_count = existing.len();

        let config = self.config.clone();
        let checked = BoundedExecutor::new(self.config.download_concurrency)
            .with_parent(self.cancel.clone())
            .execute(existing.clone(), move |id, _token| {
                let manifest = Arc::clone(&manifest);
                let path = config.file_path(&id);
                async move {
                    let expected = manifest.get(&id).ok_or_else(|| {
                        Error::ManifestMismatch(format!("no digest for {}", id))
                    })?;
                    let actual = digest_file(&path).await?;
                    if &actual == expected {
                        return Ok(true);
                    }

                    tokio::fs::remove_file(&path)
                        .await
                        .map_err(|e| Error::WriteFailed {
                            path: path.clone(),
                            source: e,
                        })?;
                    tracing::warn!(
                        id = %id,
                        path = %path.display(),
                        expected = %expected,
                        actual = %actual,
                        "Removed file with hash mismatch"
                    );
                    Ok(false)
                }
            })
            .await?;

        let kept: Vec<K> = existing
            .into_iter()
            .filter(|id| checked.get(id).copied().unwrap_or(false))
            .collect();
        tracing::info!(
            removed = checked_count - kept.len(),
            kept = kept.len(),
            "Verified existing files"
        );
        Ok(kept)
    }

    /// Work out what is left to download for `ids`.
    ///
    /// Creates the output directory, probes every identifier, checks the
    /// manifest lists exactly the requested identifiers (when verification is
    /// on), keeps verified existing files and measures free space.
    pub async fn plan(&self, ids: &[K], manifest: Option<&HashManifest>) -> Result<BatchPlan<K>> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| Error::WriteFailed {
                path: self.config.output_dir.clone(),
                source: e,
            })?;

        let sizes = self.fetch_sizes(ids).await?;

        if self.config.verify_hashes {
            self.require_manifest(manifest)?.ensure_covers(ids)?;
        }

        let existing = self.existing_files(ids).await?;
        tracing::info!(files = existing.len(), "Found existing files in output directory");
        let skipped = self.verify_existing(existing, manifest).await?;

        let skip: HashSet<&K> = skipped.iter().collect();
        let mut seen = HashSet::new();
        let pending: Vec<K> = ids
            .iter()
            .filter(|id| !skip.contains(id) && seen.insert(*id))
            .cloned()
            .collect();

        let total_bytes = sizes.values().sum();
        let remaining_bytes = pending.iter().filter_map(|id| sizes.get(id)).sum();
        let available_space = available_space(&self.config.output_dir)?;

        let plan = BatchPlan {
            pending,
            skipped,
            sizes,
            total_bytes,
            remaining_bytes,
            available_space,
        };

        if !plan.has_enough_space() {
            tracing::warn!(
                output_dir = %self.config.output_dir.display(),
                required = plan.remaining_bytes,
                available = plan.available_space,
                "Not enough disk space for remaining downloads"
            );
        }
        tracing::info!(
            pending = plan.pending.len(),
            skipped = plan.skipped.len(),
            remaining = %format_size(plan.remaining_bytes),
            "Batch planned"
        );
        Ok(plan)
    }

    /// Download every pending item of `plan`, verifying each finished file.
    ///
    /// At most `download_concurrency` items run at once. `progress` receives
    /// `(bytes_done, remaining_bytes)` across the whole batch. The first item
    /// to fail cancels the rest and its error is returned.
    pub async fn download(
        &self,
        plan: &BatchPlan<K>,
        manifest: Option<&HashManifest>,
        progress: Option<SharedProgress>,
    ) -> Result<HashMap<K, DownloadOutcome>> {
        if plan.is_complete() {
            tracing::info!("Nothing to download");
            return Ok(HashMap::new());
        }

        let manifest = if self.config.verify_hashes {
            Some(Arc::new(self.require_manifest(manifest)?.clone()))
        } else {
            None
        };
        let batch_progress = progress.map(|sink| {
            Arc::new(BatchProgress {
                done: std::sync::Mutex::new(0),
                total: plan.remaining_bytes,
                sink,
            })
        });

        tracing::info!(
            items = plan.pending.len(),
            total = %format_size(plan.remaining_bytes),
            "Downloading batch"
        );

        let resolver = Arc::clone(&self.resolver);
        let downloader = self.downloader.clone();
        let config = self.config.clone();
        let chunk_count = self.chunk_count;

        let outcomes = BoundedExecutor::new(self.config.download_concurrency)
            .with_parent(self.cancel.clone())
            .execute(plan.pending.clone(), move |id, token| {
                let resolver = Arc::clone(&resolver);
                let downloader = downloader.clone();
                let manifest = manifest.clone();
                let item_progress = batch_progress.clone().map(|batch| {
                    Arc::new(ItemProgress {
                        reported: AtomicU64::new(0),
                        batch,
                    }) as SharedProgress
                });
                let path = config.file_path(&id);
                let base_dir = config.output_dir.clone();

                async move {
                    let expected = match &manifest {
                        Some(manifest) => Some(manifest.get(&id).cloned().ok_or_else(|| {
                            Error::ManifestMismatch(format!("no digest for {}", id))
                        })?),
                        None => None,
                    };

                    let url = resolver.resolve(&id).await?;
                    let spec = DownloadSpec::new(url, &path, base_dir, chunk_count);
                    let outcome = downloader.download(&spec, &token, item_progress).await?;

                    if let Some(expected) = expected {
                        verify_digest(&path, &expected).await?;
                    }
                    tracing::info!(id = %id, path = %path.display(), "Item complete");
                    Ok(outcome)
                }
            })
            .await?;

        tracing::info!(items = outcomes.len(), "Batch complete");
        Ok(outcomes)
    }

    /// Plan and download in one go, refusing to start when space is short
    pub async fn run(
        &self,
        ids: &[K],
        manifest: Option<&HashManifest>,
        progress: Option<SharedProgress>,
    ) -> Result<HashMap<K, DownloadOutcome>> {
        let plan = self.plan(ids, manifest).await?;
        plan.ensure_space()?;
        self.download(&plan, manifest, progress).await
    }

    fn require_manifest<'a>(&self, manifest: Option<&'a HashManifest>) -> Result<&'a HashManifest> {
        manifest.ok_or_else(|| {
            Error::ManifestMismatch("hash verification is enabled but no manifest was given".into())
        })
    }
}
