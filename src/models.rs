//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, chunks, index records, and
//! retrieval results that flow from chunking through answer composition.

use serde::{Deserialize, Serialize};

/// A normalized source document.
///
/// Produced once per source file by the (external) text-cleaning step and
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub text: String,
    pub word_count: usize,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let word_count = text.split_whitespace().count();
        Self {
            id: id.into(),
            title: title.into(),
            text,
            word_count,
        }
    }
}

/// A contiguous window of a document's text.
///
/// `start..end` are UTF-8 byte offsets into the owning document's text and
/// `text` is exactly that slice. `overlap` is the number of bytes shared
/// with the previous chunk of the same document (0 for the first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub overlap: usize,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk's embedding plus a denormalized copy of its text and provenance,
/// so search hits are self-describing.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub chunk_id: String,
    pub document_id: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            start: chunk.start,
            end: chunk.end,
            text: chunk.text.clone(),
            vector,
        }
    }
}

/// One search hit: a record and its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: EmbeddingRecord,
    pub score: f32,
}

/// Provenance for a chunk included in a [`RetrievedContext`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPassage {
    pub chunk_id: String,
    pub document_id: String,
    pub start: usize,
    pub end: usize,
    pub score: f32,
}

/// The bounded evidence handed to answer generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievedContext {
    /// Included chunk texts in descending score order, `\n---\n` separated.
    pub text: String,
    pub passages: Vec<ContextPassage>,
    /// Hits returned by the index before threshold filtering.
    pub candidates: usize,
    /// Hits removed by the similarity threshold.
    pub below_threshold: usize,
}

impl RetrievedContext {
    /// True when no evidence survived filtering and budgeting.
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Result of a full question-answering round trip.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    /// False when the context was empty and the insufficient-evidence
    /// answer was returned without calling the generator.
    pub grounded: bool,
    pub context: RetrievedContext,
}
