//! Build-side commands: `rag chunk`, `rag index build`, `rag index info`.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::corpus::{load_corpus, write_chunks};
use crate::index::VectorIndex;
use crate::pipeline::RagPipeline;
use crate::stats::format_bytes;

/// Chunk the corpus, print per-document counts, optionally write a chunk file.
pub fn run_chunk(config: &Config, out: Option<&Path>) -> Result<()> {
    let settings = config.pipeline_settings()?;
    let documents = load_corpus(&config.corpus)?;

    println!(
        "chunk (max_size {}, overlap {})",
        settings.max_size(),
        settings.overlap()
    );

    let mut all_chunks = Vec::new();
    for doc in &documents {
        let chunks = chunk_document(doc, settings.max_size(), settings.overlap())?;
        println!("  {:<40} {:>6} chunks", doc.id, chunks.len());
        all_chunks.extend(chunks);
    }
    println!("  total: {} chunks from {} documents", all_chunks.len(), documents.len());

    if let Some(path) = out {
        write_chunks(path, &all_chunks, settings.max_size(), settings.overlap())?;
        println!("  wrote {}", path.display());
    }
    Ok(())
}

/// Chunk, embed and persist the corpus index.
pub async fn run_index_build(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pipeline = RagPipeline::from_config(config)?;
    let documents = load_corpus(&config.corpus)?;
    if documents.is_empty() {
        log::warn!("Corpus at {} has no documents", config.corpus.root.display());
    }

    let report = pipeline.build_index(&documents).await?;
    let header = pipeline.index().snapshot().save(&config.index.path)?;

    println!("index build");
    println!("  documents: {}", report.documents);
    println!("  chunks:    {}", report.chunks);
    println!("  batches:   {}", report.batches);
    println!("  dims:      {}", header.dims);
    println!("  model:     {}", header.model);
    println!("  saved:     {}", config.index.path.display());
    Ok(())
}

/// Print the persisted index header.
pub fn run_index_info(config: &Config) -> Result<()> {
    let path = &config.index.path;
    if !path.exists() {
        bail!(
            "No index at {}. Run `rag index build` first.",
            path.display()
        );
    }
    let header = VectorIndex::read_header(path)
        .with_context(|| format!("Failed to read index: {}", path.display()))?;
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    println!("Index");
    println!("=====");
    println!();
    println!("  Path:        {}", path.display());
    println!("  Size:        {}", format_bytes(size));
    println!("  Format:      v{}", header.format_version);
    println!("  Metric:      {}", header.metric);
    println!("  Model:       {}", header.model);
    println!("  Dims:        {}", header.dims);
    println!("  Records:     {}", header.record_count);
    println!(
        "  Created:     {}",
        header.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Checksum:    {}", header.checksum);
    println!();
    Ok(())
}
