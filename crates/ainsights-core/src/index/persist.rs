//! Durable storage for [`VectorIndex`].
//!
//! The on-disk format is a single JSON document:
//!
//! ```text
//! {
//!   "format": "ainsights.vector-index",
//!   "version": 1,
//!   "dims": 384,
//!   "metric": "cosine",
//!   "model": "all-minilm-l6-v2",
//!   "saved_at": "2024-05-01T12:00:00Z",
//!   "entries": [ { "segment": { ... }, "vector": "<base64 LE f32 bytes>" } ]
//! }
//! ```
//!
//! Vectors are stored as raw little-endian bytes so a reloaded index holds
//! bit-identical embeddings and answers every query exactly as before.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{DistanceMetric, IndexEntry, VectorIndex};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::Segment;

/// Format tag written to every index file.
pub const INDEX_FORMAT: &str = "ainsights.vector-index";
/// Current format version.
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct IndexFile {
    format: String,
    version: u32,
    dims: usize,
    metric: DistanceMetric,
    model: String,
    saved_at: String,
    entries: Vec<StoredEntry>,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    segment: Segment,
    vector: String,
}

impl VectorIndex {
    /// Write the index to `path`, replacing any existing file.
    ///
    /// The file is written next to the target and renamed into place, so
    /// readers never see a half-written index.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = {
            let entries = self.read_entries();
            let file = IndexFile {
                format: INDEX_FORMAT.to_string(),
                version: INDEX_FORMAT_VERSION,
                dims: self.dims,
                metric: self.metric,
                model: self.model.clone(),
                saved_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                entries: entries
                    .values()
                    .map(|e| StoredEntry {
                        segment: e.segment.clone(),
                        vector: STANDARD.encode(vec_to_blob(&e.embedding)),
                    })
                    .collect(),
            };
            serde_json::to_vec(&file)?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        tracing::debug!(path = %path.display(), entries = self.len(), "saved vector index");
        Ok(())
    }

    /// Load an index and require it to hold `dims`-dimensional vectors.
    ///
    /// # Errors
    ///
    /// [`Error::IncompatibleIndex`] when the file is not an index, uses an
    /// unknown format version, or was built with a different dimension.
    pub fn load(path: &Path, dims: usize) -> Result<Self> {
        let index = Self::load_any(path)?;
        if index.dims != dims {
            return Err(Error::incompatible(
                path.display().to_string(),
                format!(
                    "index was built with {}-dimensional embeddings but the configured model produces {}",
                    index.dims, dims
                ),
            ));
        }
        Ok(index)
    }

    /// Load an index with whatever dimension it was built with.
    pub fn load_any(path: &Path) -> Result<Self> {
        let shown = path.display().to_string();
        let bytes = std::fs::read(path)?;
        let file: IndexFile = serde_json::from_slice(&bytes)
            .map_err(|e| Error::incompatible(&shown, format!("not an index file: {}", e)))?;

        if file.format != INDEX_FORMAT {
            return Err(Error::incompatible(
                &shown,
                format!("unexpected format tag '{}'", file.format),
            ));
        }
        if file.version != INDEX_FORMAT_VERSION {
            return Err(Error::incompatible(
                &shown,
                format!(
                    "format version {} is not supported (expected {})",
                    file.version, INDEX_FORMAT_VERSION
                ),
            ));
        }

        let mut entries = BTreeMap::new();
        for stored in file.entries {
            let blob = STANDARD.decode(stored.vector.as_bytes()).map_err(|e| {
                Error::incompatible(
                    &shown,
                    format!("vector for '{}' is not valid base64: {}", stored.segment.id, e),
                )
            })?;
            if blob.len() != file.dims * 4 {
                return Err(Error::incompatible(
                    &shown,
                    format!(
                        "vector for '{}' has {} bytes, expected {}",
                        stored.segment.id,
                        blob.len(),
                        file.dims * 4
                    ),
                ));
            }
            entries.insert(
                stored.segment.id.clone(),
                IndexEntry {
                    segment: stored.segment,
                    embedding: blob_to_vec(&blob),
                },
            );
        }

        tracing::debug!(path = %shown, entries = entries.len(), dims = file.dims, "loaded vector index");
        Ok(VectorIndex::from_entries(
            file.dims,
            file.metric,
            file.model,
            entries,
        ))
    }
}
