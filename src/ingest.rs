//! Ingestion pipeline.
//!
//! Each document goes through decode → chunk → embed → index, where the
//! last step atomically replaces any segments the same document id had
//! before. Documents are processed independently: a failure is recorded
//! in the [`IngestReport`] and the batch continues.

use ainsights_core::chunk::Chunker;
use ainsights_core::embedding::EmbeddingProvider;
use ainsights_core::index::VectorIndex;
use ainsights_core::models::{Document, SourceType};
use ainsights_core::Error as CoreError;
use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::{Config, FilesystemConnectorConfig};
use crate::connector_fs;
use crate::embedding::{create_provider, embed_in_batches};
use crate::progress::{IngestProgressEvent, ProgressMode, ProgressReporter};
use crate::store;

/// Raw content handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Text(String),
    Bytes(Vec<u8>),
}

/// A document as submitted for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInput {
    pub id: String,
    pub source_type: SourceType,
    pub content: DocumentContent,
    /// Unix milliseconds; stamped at ingestion time when unset.
    pub ingested_at: Option<i64>,
}

impl DocumentInput {
    pub fn text(id: impl Into<String>, source_type: SourceType, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_type,
            content: DocumentContent::Text(text.into()),
            ingested_at: None,
        }
    }

    pub fn bytes(id: impl Into<String>, source_type: SourceType, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            source_type,
            content: DocumentContent::Bytes(bytes),
            ingested_at: None,
        }
    }

    pub fn with_ingested_at(mut self, ingested_at: i64) -> Self {
        self.ingested_at = Some(ingested_at);
        self
    }

    fn into_document(self) -> Document {
        let doc = match self.content {
            DocumentContent::Text(text) => Document::text(self.id, self.source_type, text),
            DocumentContent::Bytes(bytes) => Document::bytes(self.id, self.source_type, bytes),
        };
        match self.ingested_at {
            Some(ts) => doc.with_ingested_at(ts),
            None => doc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedDocument {
    pub id: String,
    pub segments: usize,
}

#[derive(Debug)]
pub struct IngestFailure {
    pub id: String,
    pub error: CoreError,
}

/// Outcome of a batch: what made it into the index and what did not.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub succeeded: Vec<IngestedDocument>,
    pub failed: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn segments_written(&self) -> usize {
        self.succeeded.iter().map(|d| d.segments).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Chunks, embeds, and indexes documents into a shared index.
pub struct Ingestor<'a> {
    chunker: Chunker,
    embedder: &'a dyn EmbeddingProvider,
    index: &'a VectorIndex,
    batch_size: usize,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        chunker: Chunker,
        embedder: &'a dyn EmbeddingProvider,
        index: &'a VectorIndex,
        batch_size: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            batch_size,
        }
    }

    pub fn from_config(
        config: &Config,
        embedder: &'a dyn EmbeddingProvider,
        index: &'a VectorIndex,
    ) -> Result<Self> {
        let chunker = Chunker::new(config.chunking.max_chars, config.chunking.overlap_chars)?;
        Ok(Self::new(chunker, embedder, index, config.embedding.batch_size))
    }

    /// Ingest one document, superseding any previous version with the same id.
    /// Returns the number of segments written.
    pub async fn ingest_document(&self, input: DocumentInput) -> ainsights_core::Result<usize> {
        let doc = input.into_document();
        let segments = self.chunker.chunk(&doc)?;
        let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
        let vectors = embed_in_batches(self.embedder, &texts, self.batch_size)
            .await
            .map_err(|e| CoreError::Embedding(format!("{:#}", e)))?;
        self.index.replace_document(&doc.id, &segments, &vectors)?;
        debug!(document = %doc.id, segments = segments.len(), "indexed document");
        Ok(segments.len())
    }

    /// Ingest every input; failures are collected, never propagated.
    pub async fn ingest_batch(
        &self,
        inputs: Vec<DocumentInput>,
        source: &str,
        progress: &dyn ProgressReporter,
    ) -> IngestReport {
        let total = inputs.len() as u64;
        let mut report = IngestReport::default();

        for (n, input) in inputs.into_iter().enumerate() {
            let id = input.id.clone();
            match self.ingest_document(input).await {
                Ok(segments) => report.succeeded.push(IngestedDocument { id, segments }),
                Err(error) => {
                    warn!(document = %id, error = %error, "document not ingested");
                    report.failed.push(IngestFailure { id, error });
                }
            }
            progress.report(IngestProgressEvent::Ingesting {
                source: source.to_string(),
                n: n as u64 + 1,
                total,
            });
        }
        report
    }
}

/// `ainsights ingest [PATHS...]`.
///
/// Without paths, scans `[connectors.filesystem]`. Directories are scanned
/// with the connector's globs; files are read as given. Files that cannot
/// be read are reported as failed documents alongside the rest of the batch.
pub async fn run_ingest(config: &Config, paths: &[PathBuf], progress: ProgressMode) -> Result<()> {
    let reporter = progress.reporter();
    let source = if paths.is_empty() {
        "filesystem".to_string()
    } else {
        "paths".to_string()
    };
    reporter.report(IngestProgressEvent::Discovering {
        source: source.clone(),
    });

    let connector = config.connectors.filesystem.as_ref();
    let scan = if paths.is_empty() {
        connector_fs::scan_filesystem(config)?
    } else {
        let mut scan = connector_fs::Scan::default();
        for path in paths {
            if path.is_dir() {
                let fs_config = connector
                    .cloned()
                    .unwrap_or_else(|| FilesystemConnectorConfig::with_root(path));
                scan.extend(connector_fs::scan_subdir(&fs_config, path)?);
            } else {
                let root = connector.map(|c| c.root.as_path());
                scan.extend(connector_fs::read_paths(std::slice::from_ref(path), root));
            }
        }
        scan
    };

    let provider = create_provider(&config.embedding)?;
    let index = store::open_index(config, provider.as_ref())?;
    let ingestor = Ingestor::from_config(config, provider.as_ref(), &index)?;

    let found = scan.len();
    let mut report = ingestor
        .ingest_batch(scan.inputs, &source, reporter.as_ref())
        .await;
    report.failed.extend(scan.failures);
    if !report.succeeded.is_empty() {
        store::save_index(config, &index)?;
    }
    if report.is_clean() {
        info!(
            documents = report.succeeded.len(),
            segments = report.segments_written(),
            "ingest finished"
        );
    } else {
        warn!(
            documents = report.succeeded.len(),
            failed = report.failed.len(),
            segments = report.segments_written(),
            "ingest finished with failures"
        );
    }

    println!("ingest {}", source);
    println!("  documents found: {}", found);
    println!("  documents ingested: {}", report.succeeded.len());
    println!("  segments written: {}", report.segments_written());
    println!("  documents failed: {}", report.failed.len());
    for failure in &report.failed {
        println!("    {}: {}", failure.id, failure.error);
    }
    println!("  index: {} segments", index.len());
    println!("ok");
    Ok(())
}
