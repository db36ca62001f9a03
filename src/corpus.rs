//! Document loading and chunk interchange files.
//!
//! A corpus is either a directory of clean text files or a JSON file
//! holding an array of `{id, title, text}` records. Directory walking
//! applies include/exclude globs relative to the root, with `.git`,
//! `target` and `node_modules` always excluded, and yields documents in
//! sorted relative-path order.
//!
//! Chunk files written by `rag chunk --out` carry the window parameters
//! next to the chunks and round-trip every [`Chunk`] field.

use std::path::Path;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::models::{Chunk, Document};

/// Load documents from `config.root`, which may be a directory or a
/// `.json` document file.
pub fn load_corpus(config: &CorpusConfig) -> Result<Vec<Document>> {
    let root = &config.root;
    if root.is_file() {
        return load_documents_json(root);
    }
    load_directory(config)
}

pub fn load_directory(config: &CorpusConfig) -> Result<Vec<Document>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        documents.push(Document::new(
            document_id(relative),
            title_for(path),
            text,
        ));
    }

    documents.sort_by(|a, b| a.id.cmp(&b.id));
    if let Some(pair) = documents.windows(2).find(|w| w[0].id == w[1].id) {
        bail!(
            "Duplicate document id '{}' in {} (files differ only by extension)",
            pair[0].id,
            root.display()
        );
    }
    log::info!("Loaded {} documents from {}", documents.len(), root.display());
    Ok(documents)
}

/// Relative path with `/` separators and the extension removed.
fn document_id(relative: &Path) -> String {
    relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn title_for(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[derive(Deserialize)]
struct DocumentRecord {
    id: String,
    #[serde(default)]
    title: Option<String>,
    text: String,
    #[serde(default)]
    word_count: Option<usize>,
}

/// Read a JSON array of `{id, title, text[, word_count]}` records.
pub fn load_documents_json(path: &Path) -> Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read documents file: {}", path.display()))?;
    let records: Vec<DocumentRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid documents file: {}", path.display()))?;

    let mut seen = std::collections::HashSet::new();
    let mut documents = Vec::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.id.clone()) {
            bail!("Duplicate document id '{}' in {}", record.id, path.display());
        }
        let title = record.title.unwrap_or_else(|| record.id.clone());
        let mut doc = Document::new(record.id, title, record.text);
        if let Some(count) = record.word_count {
            doc.word_count = count;
        }
        documents.push(doc);
    }
    Ok(documents)
}

/// Window parameters recorded alongside chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingSummary {
    pub max_size: usize,
    pub overlap: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFile {
    pub chunking_config: ChunkingSummary,
    pub chunks: Vec<Chunk>,
}

pub fn write_chunks(path: &Path, chunks: &[Chunk], max_size: usize, overlap: usize) -> Result<()> {
    let file = ChunkFile {
        chunking_config: ChunkingSummary {
            max_size,
            overlap,
            total_chunks: chunks.len(),
        },
        chunks: chunks.to_vec(),
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write chunk file: {}", path.display()))?;
    Ok(())
}

pub fn read_chunks(path: &Path) -> Result<ChunkFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chunk file: {}", path.display()))?;
    let file: ChunkFile = serde_json::from_str(&content)
        .with_context(|| format!("Invalid chunk file: {}", path.display()))?;
    if file.chunking_config.total_chunks != file.chunks.len() {
        bail!(
            "Chunk file {} declares {} chunks but holds {}",
            path.display(),
            file.chunking_config.total_chunks,
            file.chunks.len()
        );
    }
    Ok(file)
}
