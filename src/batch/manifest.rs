//! Trusted digests for a batch, keyed by identifier.
//!
//! On disk the manifest is a flat JSON object: `{ "<id>": "<digest>", ... }`.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::checksum::Digest;
use crate::error::{Error, Result};

/// Conventional manifest location, relative to the working directory
pub const DEFAULT_MANIFEST_PATH: &str = "hash/sum.json";

/// Identifier → expected [`Digest`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashManifest {
    entries: HashMap<String, Digest>,
}

impl HashManifest {
    /// Empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a manifest from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => Error::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        let manifest: HashManifest = serde_json::from_str(&raw)?;

        tracing::debug!(
            path = %path.display(),
            entries = manifest.len(),
            "Loaded hash manifest"
        );
        Ok(manifest)
    }

    /// Record the expected digest for `id`
    pub fn insert(&mut self, id: impl Display, digest: Digest) {
        self.entries.insert(id.to_string(), digest);
    }

    /// Expected digest for `id`, if listed
    pub fn get(&self, id: &impl Display) -> Option<&Digest> {
        self.entries.get(&id.to_string())
    }

    /// Number of listed identifiers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no identifiers are listed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that the manifest lists exactly the given identifiers.
    ///
    /// Fails with [`Error::ManifestMismatch`] when an identifier is missing
    /// or the manifest lists identifiers that were not requested.
    pub fn ensure_covers<K: Display>(&self, ids: &[K]) -> Result<()> {
        let requested: HashSet<String> = ids.iter().map(ToString::to_string).collect();

        let missing: Vec<&str> = requested
            .iter()
            .filter(|id| !self.entries.contains_key(*id))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(Error::ManifestMismatch(format!(
                "no digest for {} of {} items (e.g. {})",
                missing.len(),
                requested.len(),
                missing[0]
            )));
        }

        if self.entries.len() != requested.len() {
            return Err(Error::ManifestMismatch(format!(
                "manifest lists {} items but {} were requested",
                self.entries.len(),
                requested.len()
            )));
        }
        Ok(())
    }
}

impl<I: Display> FromIterator<(I, Digest)> for HashManifest {
    fn from_iter<T: IntoIterator<Item = (I, Digest)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(id, digest)| (id.to_string(), digest))
                .collect(),
        }
    }
}
