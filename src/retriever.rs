//! Query-time retrieval: embed → search → filter → assemble.
//!
//! [`assemble_context`] is the pure, deterministic half: it applies the
//! similarity threshold and the character budget to ranked hits. The
//! [`Retriever`] wraps it with the embedding call, which is bounded by a
//! deadline and a cancellation token.
//!
//! Budgeting is greedy over the hits in descending score order: a chunk is
//! included whole or not at all, and assembly stops at the first chunk that
//! does not fit, so the context is always a score-ordered prefix.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::index::SharedIndex;
use crate::models::{ContextPassage, RetrievedContext, ScoredRecord};
use crate::upstream::bounded;

/// Placed between consecutive passages in [`RetrievedContext::text`]; its
/// characters count toward the budget.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Filter ranked hits by `threshold` and concatenate them within
/// `max_chars` characters.
pub fn assemble_context(hits: Vec<ScoredRecord>, threshold: f32, max_chars: usize) -> RetrievedContext {
    let candidates = hits.len();
    let kept: Vec<ScoredRecord> = hits.into_iter().filter(|h| h.score >= threshold).collect();
    let below_threshold = candidates - kept.len();

    let separator_chars = CONTEXT_SEPARATOR.chars().count();
    let mut text = String::new();
    let mut used = 0usize;
    let mut passages = Vec::new();

    for hit in kept {
        let piece = hit.record.text.trim();
        if piece.is_empty() {
            continue;
        }
        let sep = if passages.is_empty() { 0 } else { separator_chars };
        let cost = sep + piece.chars().count();
        if used + cost > max_chars {
            break;
        }
        if sep > 0 {
            text.push_str(CONTEXT_SEPARATOR);
        }
        text.push_str(piece);
        used += cost;
        passages.push(ContextPassage {
            chunk_id: hit.record.chunk_id,
            document_id: hit.record.document_id,
            start: hit.record.start,
            end: hit.record.end,
            score: hit.score,
        });
    }

    RetrievedContext {
        text,
        passages,
        candidates,
        below_threshold,
    }
}

/// Embeds queries and turns index hits into a bounded context.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<SharedIndex>,
    similarity_threshold: f32,
    embed_timeout: Duration,
}

impl Retriever {
    /// # Errors
    ///
    /// [`RagError::InvalidArgument`] if the threshold is outside `[-1, 1]`
    /// or the timeout is zero.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<SharedIndex>,
        similarity_threshold: f32,
        embed_timeout: Duration,
    ) -> Result<Self> {
        if !(-1.0..=1.0).contains(&similarity_threshold) {
            return Err(RagError::invalid(format!(
                "similarity_threshold must be within [-1, 1], got {}",
                similarity_threshold
            )));
        }
        if embed_timeout.is_zero() {
            return Err(RagError::invalid("embedding timeout must be > 0"));
        }
        Ok(Self {
            embedder,
            index,
            similarity_threshold,
            embed_timeout,
        })
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        max_context_chars: usize,
    ) -> Result<RetrievedContext> {
        self.retrieve_with_cancel(query, top_k, max_context_chars, &CancellationToken::new())
            .await
    }

    /// Retrieve a bounded context for `query`.
    ///
    /// A blank query yields an empty context without calling the embedder.
    /// An empty context is a valid outcome meaning "insufficient evidence".
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidArgument`] if `top_k` or `max_context_chars` is 0.
    /// - Embedding errors, [`RagError::UpstreamTimeout`] and
    ///   [`RagError::Cancelled`] from the query embedding, unmodified.
    /// - [`RagError::DimensionMismatch`] if the embedder and index disagree.
    pub async fn retrieve_with_cancel(
        &self,
        query: &str,
        top_k: usize,
        max_context_chars: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievedContext> {
        if max_context_chars == 0 {
            return Err(RagError::invalid("max_context_chars must be > 0"));
        }
        let hits = self.search(query, top_k, cancel).await?;
        let context = assemble_context(hits, self.similarity_threshold, max_context_chars);

        log::debug!(
            "Retrieved {} candidates, {} below threshold {}, {} included ({} chars)",
            context.candidates,
            context.below_threshold,
            self.similarity_threshold,
            context.passages.len(),
            context.text.chars().count()
        );
        Ok(context)
    }

    /// Embed `query` and return the raw ranked hits, before thresholding.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredRecord>> {
        if top_k == 0 {
            return Err(RagError::invalid("top_k must be > 0"));
        }
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = bounded(
            "query embedding",
            self.embed_timeout,
            cancel,
            self.embedder.embed(query),
        )
        .await?;

        self.index.snapshot().search(&vector, top_k)
    }
}
