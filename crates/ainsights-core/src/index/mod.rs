//! In-memory vector index with single-writer/multi-reader access.
//!
//! [`VectorIndex`] stores one [`IndexEntry`] per segment id and answers
//! exact nearest-neighbor queries by brute force. All mutations take the
//! write lock for their whole duration, so a concurrent [`search`] sees
//! either the entry set before an upsert or the one after it, never a mix.
//!
//! Persistence (`save` / `load`) lives in [`persist`].
//!
//! [`search`]: VectorIndex::search

pub mod persist;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::embedding::{cosine_similarity, euclidean_distance};
use crate::error::{Error, Result};
use crate::models::Segment;

/// Distance function used to rank entries. Smaller is closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cosine_similarity`, in `[0, 2]`.
    #[default]
    Cosine,
    /// L2 distance.
    Euclidean,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::Euclidean => euclidean_distance(a, b),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Cosine => f.write_str("cosine"),
            DistanceMetric::Euclidean => f.write_str("euclidean"),
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            other => Err(Error::Config(format!(
                "unknown distance metric '{}': expected cosine or euclidean",
                other
            ))),
        }
    }
}

/// A stored segment together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub segment: Segment,
    pub embedding: Vec<f32>,
}

/// A search result: the matched segment and its distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub segment: Segment,
    pub distance: f32,
}

/// Exact nearest-neighbor index keyed by segment id.
///
/// Share one instance between sessions with `Arc<VectorIndex>`.
#[derive(Debug)]
pub struct VectorIndex {
    dims: usize,
    metric: DistanceMetric,
    model: String,
    entries: RwLock<BTreeMap<String, IndexEntry>>,
}

impl VectorIndex {
    /// Create an empty index for vectors of `dims` components produced by `model`.
    pub fn new(dims: usize, metric: DistanceMetric, model: impl Into<String>) -> Self {
        Self {
            dims,
            metric,
            model: model.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn from_entries(
        dims: usize,
        metric: DistanceMetric,
        model: String,
        entries: BTreeMap<String, IndexEntry>,
    ) -> Self {
        Self {
            dims,
            metric,
            model,
            entries: RwLock::new(entries),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Identifier of the embedding model the stored vectors came from.
    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Ids of all documents with at least one entry, sorted.
    pub fn document_ids(&self) -> Vec<String> {
        let entries = self.entries.read();
        entries
            .values()
            .map(|e| e.segment.document_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.entries
            .read()
            .values()
            .any(|e| e.segment.document_id == document_id)
    }

    /// Snapshot of every stored segment, ordered by segment id.
    pub fn segments(&self) -> Vec<Segment> {
        self.entries
            .read()
            .values()
            .map(|e| e.segment.clone())
            .collect()
    }

    /// Insert or replace entries keyed by segment id.
    ///
    /// All vectors are validated before the write lock is taken; on error
    /// nothing is applied. Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// - [`Error::DimensionMismatch`] if any vector has the wrong length.
    /// - [`Error::Index`] if the slices differ in length or a vector holds
    ///   non-finite values.
    pub fn upsert(&self, segments: &[Segment], embeddings: &[Vec<f32>]) -> Result<usize> {
        self.validate(segments, embeddings)?;
        let mut entries = self.entries.write();
        Self::insert_all(&mut entries, segments, embeddings);
        Ok(segments.len())
    }

    /// Atomically supersede a document: drop all of its entries and insert
    /// the new ones under a single write lock.
    pub fn replace_document(
        &self,
        document_id: &str,
        segments: &[Segment],
        embeddings: &[Vec<f32>],
    ) -> Result<usize> {
        if let Some(stray) = segments.iter().find(|s| s.document_id != document_id) {
            return Err(Error::Index(format!(
                "segment '{}' belongs to document '{}', not '{}'",
                stray.id, stray.document_id, document_id
            )));
        }
        self.validate(segments, embeddings)?;

        let mut entries = self.entries.write();
        entries.retain(|_, e| e.segment.document_id != document_id);
        Self::insert_all(&mut entries, segments, embeddings);
        Ok(segments.len())
    }

    /// Delete every entry derived from `document_id`. Returns how many were removed.
    pub fn remove(&self, document_id: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.segment.document_id != document_id);
        before - entries.len()
    }

    /// Return the `k` entries closest to `query`.
    ///
    /// Results are ordered by ascending distance; ties go to the most
    /// recently ingested segment, then to the smaller segment id.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] if `query` does not have [`dims`](Self::dims)
    /// components. No partial results are returned.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read();
        let mut hits: Vec<SearchHit> = entries
            .values()
            .map(|e| SearchHit {
                distance: self.metric.distance(query, &e.embedding),
                segment: e.segment.clone(),
            })
            .collect();
        drop(entries);

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(b.segment.ingested_at.cmp(&a.segment.ingested_at))
                .then(a.segment.id.cmp(&b.segment.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    pub(crate) fn read_entries(
        &self,
    ) -> parking_lot::RwLockReadGuard<'_, BTreeMap<String, IndexEntry>> {
        self.entries.read()
    }

    fn validate(&self, segments: &[Segment], embeddings: &[Vec<f32>]) -> Result<()> {
        if segments.len() != embeddings.len() {
            return Err(Error::Index(format!(
                "got {} segments but {} embeddings",
                segments.len(),
                embeddings.len()
            )));
        }
        for (segment, vector) in segments.iter().zip(embeddings) {
            if vector.len() != self.dims {
                return Err(Error::DimensionMismatch {
                    expected: self.dims,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(Error::Index(format!(
                    "embedding for segment '{}' contains non-finite values",
                    segment.id
                )));
            }
        }
        Ok(())
    }

    fn insert_all(
        entries: &mut BTreeMap<String, IndexEntry>,
        segments: &[Segment],
        embeddings: &[Vec<f32>],
    ) {
        for (segment, vector) in segments.iter().zip(embeddings) {
            entries.insert(
                segment.id.clone(),
                IndexEntry {
                    segment: segment.clone(),
                    embedding: vector.clone(),
                },
            );
        }
    }
}
