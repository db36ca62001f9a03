//! Query-side commands: `rag search` and `rag ask`.

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::index::VectorIndex;
use crate::pipeline::RagPipeline;

/// Build a pipeline from config and load the persisted index into it.
pub fn load_pipeline(config: &Config) -> Result<RagPipeline> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let path = &config.index.path;
    if !path.exists() {
        bail!(
            "No index at {}. Run `rag index build` first.",
            path.display()
        );
    }

    let pipeline = RagPipeline::from_config(config)?;
    let index = VectorIndex::load(path)
        .with_context(|| format!("Failed to load index: {}", path.display()))?;

    let embedder = pipeline.embedder();
    if index.model() != embedder.model_name() {
        log::warn!(
            "Index was built with model '{}' but the configured model is '{}'",
            index.model(),
            embedder.model_name()
        );
    }
    if let Some(dims) = index.dims() {
        if embedder.dims() != 0 && embedder.dims() != dims {
            bail!(
                "Index dims ({}) do not match embedding.dims ({}). Rebuild the index.",
                dims,
                embedder.dims()
            );
        }
    }

    pipeline.index().replace(index);
    Ok(pipeline)
}

pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let pipeline = load_pipeline(config)?;
    let k = top_k.unwrap_or(pipeline.settings().top_k());
    let hits = pipeline.search(query, k).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let threshold = pipeline.settings().similarity_threshold();
    for (i, hit) in hits.iter().enumerate() {
        let marker = if hit.score < threshold {
            " (below threshold)"
        } else {
            ""
        };
        println!(
            "{}. [{:.3}] {}{}",
            i + 1,
            hit.score,
            hit.record.chunk_id,
            marker
        );
        println!("    document: {}", hit.record.document_id);
        println!("    offsets: {}..{}", hit.record.start, hit.record.end);
        println!("    excerpt: \"{}\"", preview(&hit.record.text, 160));
        println!();
    }
    Ok(())
}

pub async fn run_ask(config: &Config, question: &str) -> Result<()> {
    let pipeline = load_pipeline(config)?;
    let answer = pipeline.ask(question).await?;

    println!("{}", answer.text);

    if answer.grounded {
        println!();
        println!("Sources:");
        for passage in &answer.context.passages {
            println!(
                "  - [{:.3}] {} ({}..{})",
                passage.score, passage.chunk_id, passage.start, passage.end
            );
        }
    }
    Ok(())
}

/// Single-line excerpt of at most `max_chars` characters.
fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
