//! Index lifecycle: open, save, remove, rebuild, and inspect the persisted
//! vector index configured under `[index]`.

use ainsights_core::embedding::EmbeddingProvider;
use ainsights_core::index::VectorIndex;
use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{create_provider, embed_in_batches};

/// Open the configured index, or start an empty one if no file exists yet.
///
/// Fails with an incompatible-index error when the stored vectors do not
/// match the provider's dimension.
pub fn open_index(config: &Config, provider: &dyn EmbeddingProvider) -> Result<VectorIndex> {
    let path = &config.index.path;
    if !path.exists() {
        info!(path = %path.display(), "no index file yet, starting empty");
        return Ok(VectorIndex::new(
            provider.dims(),
            config.index.metric,
            provider.model_name(),
        ));
    }

    let index = VectorIndex::load(path, provider.dims())
        .with_context(|| format!("Failed to open index {}", path.display()))?;
    check_compatibility(config, &index, provider);
    Ok(index)
}

/// Like [`open_index`] but requires the file to exist.
pub fn open_existing(config: &Config, provider: &dyn EmbeddingProvider) -> Result<VectorIndex> {
    if !config.index.path.exists() {
        bail!(
            "No index at {}. Run `ainsights ingest` first.",
            config.index.path.display()
        );
    }
    open_index(config, provider)
}

/// Open the index for answering questions.
///
/// Queries must still get statistics and history when the index is stale,
/// so a dimension mismatch keeps the stored index (searches against it
/// degrade) and an unreadable file yields an empty index.
pub fn open_for_query(config: &Config, provider: &dyn EmbeddingProvider) -> VectorIndex {
    let path = &config.index.path;
    let empty = || VectorIndex::new(provider.dims(), config.index.metric, provider.model_name());
    if !path.exists() {
        return empty();
    }
    match VectorIndex::load(path, provider.dims()) {
        Ok(index) => {
            check_compatibility(config, &index, provider);
            index
        }
        Err(e) if e.requires_rebuild() => {
            warn!(error = %e, "index does not match the embedding provider; documents will be skipped");
            VectorIndex::load_any(path).unwrap_or_else(|_| empty())
        }
        Err(e) => {
            warn!(error = %e, "failed to read index; answering without documents");
            empty()
        }
    }
}

fn check_compatibility(config: &Config, index: &VectorIndex, provider: &dyn EmbeddingProvider) {
    if !is_disabled(provider) && index.model_name() != provider.model_name() {
        warn!(
            index_model = index.model_name(),
            provider_model = provider.model_name(),
            "index was built with a different embedding model; run `ainsights rebuild`"
        );
    }
    if index.metric() != config.index.metric {
        warn!(
            stored = %index.metric(),
            configured = %config.index.metric,
            "index uses the metric it was built with; run `ainsights rebuild` to switch"
        );
    }
}

fn is_disabled(provider: &dyn EmbeddingProvider) -> bool {
    provider.model_name() == "disabled"
}

pub fn save_index(config: &Config, index: &VectorIndex) -> Result<()> {
    index
        .save(&config.index.path)
        .with_context(|| format!("Failed to save index {}", config.index.path.display()))
}

/// Re-embed every segment of `old` with `provider` into a fresh index.
///
/// Segment ids, offsets, and timestamps are preserved.
pub async fn rebuild_index(
    old: &VectorIndex,
    provider: &dyn EmbeddingProvider,
    metric: ainsights_core::index::DistanceMetric,
    batch_size: usize,
) -> Result<VectorIndex> {
    let segments = old.segments();
    let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
    let vectors = embed_in_batches(provider, &texts, batch_size).await?;

    let fresh = VectorIndex::new(provider.dims(), metric, provider.model_name());
    fresh.upsert(&segments, &vectors)?;
    Ok(fresh)
}

/// `ainsights rebuild`: regenerate all embeddings with the current model.
pub async fn run_rebuild(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Cannot rebuild: embedding provider is disabled");
    }
    let provider = create_provider(&config.embedding)?;
    let path = &config.index.path;
    if !path.exists() {
        bail!("No index at {}. Nothing to rebuild.", path.display());
    }

    let old = VectorIndex::load_any(path)
        .with_context(|| format!("Failed to read index {}", path.display()))?;
    let fresh = rebuild_index(
        &old,
        provider.as_ref(),
        config.index.metric,
        config.embedding.batch_size,
    )
    .await?;
    save_index(config, &fresh)?;

    println!("rebuild");
    println!("  segments re-embedded: {}", fresh.len());
    println!("  model: {} -> {}", old.model_name(), fresh.model_name());
    println!("  dims: {} -> {}", old.dims(), fresh.dims());
    println!("ok");
    Ok(())
}

/// `ainsights remove <id>`: drop a document and all its segments.
pub fn run_remove(config: &Config, document_id: &str) -> Result<()> {
    let provider = create_provider(&config.embedding)?;
    let index = open_existing(config, provider.as_ref())?;
    if !index.contains_document(document_id) {
        bail!("Document not found in index: {}", document_id);
    }
    let removed = index.remove(document_id);
    save_index(config, &index)?;
    info!(document = document_id, segments = removed, "removed document");

    println!("removed {}", document_id);
    println!("  segments deleted: {}", removed);
    Ok(())
}

/// `ainsights info`: summarize what is indexed.
pub fn run_info(config: &Config) -> Result<()> {
    let path = &config.index.path;
    println!("AInsights: Index Info");
    println!("======================");
    println!();
    println!("  Index:       {}", path.display());

    if !path.exists() {
        println!("  Status:      not created yet (run `ainsights ingest`)");
        println!();
        return Ok(());
    }

    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let index = VectorIndex::load_any(path)
        .with_context(|| format!("Failed to read index {}", path.display()))?;
    let documents = index.document_ids();

    println!("  Size:        {}", format_bytes(size));
    println!("  Model:       {}", index.model_name());
    println!("  Dims:        {}", index.dims());
    println!("  Metric:      {}", index.metric());
    println!();
    println!("  Documents:   {}", documents.len());
    println!("  Segments:    {}", index.len());

    let provider = create_provider(&config.embedding)?;
    if provider.dims() != index.dims() {
        println!();
        println!(
            "  WARNING: configured provider '{}' produces {} dims; run `ainsights rebuild`",
            provider.model_name(),
            provider.dims()
        );
    } else if !is_disabled(provider.as_ref()) && provider.model_name() != index.model_name() {
        println!();
        println!(
            "  WARNING: configured model '{}' differs from the index; run `ainsights rebuild`",
            provider.model_name()
        );
    }

    if !documents.is_empty() {
        let segments = index.segments();
        println!();
        println!("  {:<40} {:>8} {:>9}", "DOCUMENT", "TYPE", "SEGMENTS");
        println!("  {}", "-".repeat(59));
        for id in &documents {
            let owned: Vec<_> = segments.iter().filter(|s| &s.document_id == id).collect();
            let kind = owned.first().map(|s| s.source_type.as_str()).unwrap_or("-");
            println!("  {:<40} {:>8} {:>9}", id, kind, owned.len());
        }
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ainsights_core::chunk::Chunker;
    use ainsights_core::embedding::HashEmbedder;
    use ainsights_core::index::DistanceMetric;
    use ainsights_core::models::{Document, SourceType};

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn test_rebuild_changes_dimension_and_keeps_segments() {
        let old_model = HashEmbedder::new(32, 1);
        let old = VectorIndex::new(32, DistanceMetric::Cosine, "hash-32-s1");
        let doc = Document::text(
            "report.md",
            SourceType::Report,
            "North revenue grew.\n\nWest shipping slowed.",
        );
        let segments = Chunker::new(25, 5).unwrap().chunk(&doc).unwrap();
        let vectors: Vec<Vec<f32>> = segments.iter().map(|s| old_model.embed_text(&s.text)).collect();
        old.upsert(&segments, &vectors).unwrap();

        let new_model = HashEmbedder::new(64, 2);
        let fresh = rebuild_index(&old, &new_model, DistanceMetric::Cosine, 2)
            .await
            .unwrap();
        assert_eq!(fresh.dims(), 64);
        assert_eq!(fresh.model_name(), "hash-64-s2");
        assert_eq!(fresh.segments(), old.segments());

        let q = new_model.embed_text("west shipping");
        let hits = fresh.search(&q, 1).unwrap();
        assert!(hits[0].segment.text.contains("West"));
    }
}
