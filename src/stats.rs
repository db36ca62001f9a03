//! Chunk quality analysis.
//!
//! Summarises how a corpus splits under the configured window: size
//! distribution, fragments that are much shorter than the window, and how
//! often chunks stop mid-sentence. Used by `rag stats` to tune `max_size`
//! and `overlap` before paying for embeddings.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::corpus::load_corpus;
use crate::models::Chunk;

/// Share of chunks that may end mid-sentence before it is flagged.
const INCOMPLETE_RATIO: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkQualityReport {
    pub total_chunks: usize,
    pub mean_size: f64,
    pub min_size: usize,
    pub max_size: usize,
    pub size_std: f64,
    /// Chunks shorter than a quarter of the window.
    pub very_short: usize,
    /// Chunks whose trimmed text does not end in `.`, `!` or `?`.
    pub incomplete_sentences: usize,
    pub chunks_per_document: BTreeMap<String, usize>,
    pub issues: Vec<String>,
}

/// Analyse chunk sizes (in characters of trimmed text) against `max_size`.
pub fn analyze_chunks(chunks: &[Chunk], max_size: usize) -> ChunkQualityReport {
    let sizes: Vec<usize> = chunks.iter().map(|c| c.text.trim().chars().count()).collect();
    let total = sizes.len();

    let mean = if total > 0 {
        sizes.iter().sum::<usize>() as f64 / total as f64
    } else {
        0.0
    };
    let variance = if total > 0 {
        sizes
            .iter()
            .map(|&s| (s as f64 - mean).powi(2))
            .sum::<f64>()
            / total as f64
    } else {
        0.0
    };

    let short_limit = max_size / 4;
    let very_short = sizes.iter().filter(|&&s| s < short_limit).count();
    let incomplete = chunks
        .iter()
        .filter(|c| {
            let text = c.text.trim();
            !text.is_empty() && !text.ends_with(['.', '!', '?'])
        })
        .count();

    let mut per_document = BTreeMap::new();
    for chunk in chunks {
        *per_document.entry(chunk.document_id.clone()).or_insert(0) += 1;
    }

    let mut issues = Vec::new();
    if very_short > 0 {
        issues.push(format!(
            "{} chunks are very short (<{} chars)",
            very_short, short_limit
        ));
    }
    if incomplete as f64 > total as f64 * INCOMPLETE_RATIO {
        issues.push(format!(
            "{} chunks may have incomplete sentences",
            incomplete
        ));
    }

    ChunkQualityReport {
        total_chunks: total,
        mean_size: mean,
        min_size: sizes.iter().copied().min().unwrap_or(0),
        max_size: sizes.iter().copied().max().unwrap_or(0),
        size_std: variance.sqrt(),
        very_short,
        incomplete_sentences: incomplete,
        chunks_per_document: per_document,
        issues,
    }
}

/// Run the stats command: chunk the configured corpus and print a report.
pub fn run_stats(config: &Config) -> Result<()> {
    let settings = config.pipeline_settings()?;
    let documents = load_corpus(&config.corpus)?;

    let mut chunks = Vec::new();
    for doc in &documents {
        chunks.extend(chunk_document(doc, settings.max_size(), settings.overlap())?);
    }
    let report = analyze_chunks(&chunks, settings.max_size());

    println!("Chunk Quality");
    println!("=============");
    println!();
    println!("  Corpus:      {}", config.corpus.root.display());
    println!(
        "  Window:      {} / overlap {}",
        settings.max_size(),
        settings.overlap()
    );
    println!("  Documents:   {}", documents.len());
    println!("  Chunks:      {}", report.total_chunks);
    println!("  Mean size:   {:.0}", report.mean_size);
    println!(
        "  Size range:  {} - {}",
        report.min_size, report.max_size
    );
    println!("  Size std:    {:.0}", report.size_std);

    if report.issues.is_empty() {
        println!();
        println!("  No quality issues detected");
    } else {
        println!();
        println!("  Issues:");
        for issue in &report.issues {
            println!("    - {}", issue);
        }
    }

    if !report.chunks_per_document.is_empty() {
        println!();
        println!("  {:<40} {:>8}", "DOCUMENT", "CHUNKS");
        println!("  {}", "-".repeat(49));
        for (doc, count) in &report.chunks_per_document {
            println!("  {:<40} {:>8}", doc, count);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
pub(crate) fn format_bytes(bytes: u64) -> String {
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
