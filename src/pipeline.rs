//! Build-time and query-time orchestration.
//!
//! ```text
//! build:  documents → chunk → embed (batched) → fresh VectorIndex → swap
//! ask:    question → Retriever → context ─┬─ empty → insufficient-evidence answer
//!                                         └─ else  → AnswerComposer → Answer
//! ```
//!
//! A pipeline owns its embedder, composer and [`SharedIndex`]; nothing is
//! global, so independent pipelines (and test instances) can coexist.
//! Every external call is bounded by a timeout and a cancellation token and
//! is made at most once per invocation.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::answer::{create_composer, AnswerComposer, INSUFFICIENT_EVIDENCE};
use crate::chunk::chunk_document;
use crate::config::{Config, PipelineSettings};
use crate::embedding::{check_batch, create_embedder, Embedder};
use crate::error::{RagError, Result};
use crate::index::{SharedIndex, VectorIndex};
use crate::models::{Answer, Chunk, Document, EmbeddingRecord, RetrievedContext, ScoredRecord};
use crate::retriever::Retriever;
use crate::upstream::bounded;

/// Batch size and deadlines for external capability calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallLimits {
    pub batch_size: usize,
    pub embed_timeout: Duration,
    pub generation_timeout: Duration,
}

impl Default for CallLimits {
    fn default() -> Self {
        Self {
            batch_size: 100,
            embed_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(60),
        }
    }
}

impl CallLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.embedding.batch_size,
            embed_timeout: config.embedding.timeout(),
            generation_timeout: config.generation.timeout(),
        }
    }
}

/// Summary of a completed index build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub batches: usize,
    pub dims: usize,
}

pub struct RagPipeline {
    settings: PipelineSettings,
    limits: CallLimits,
    embedder: Arc<dyn Embedder>,
    composer: Arc<dyn AnswerComposer>,
    index: Arc<SharedIndex>,
    retriever: Retriever,
}

impl RagPipeline {
    /// # Errors
    ///
    /// [`RagError::InvalidArgument`] for a zero batch size or timeout.
    pub fn new(
        settings: PipelineSettings,
        limits: CallLimits,
        embedder: Arc<dyn Embedder>,
        composer: Arc<dyn AnswerComposer>,
        index: Arc<SharedIndex>,
    ) -> Result<Self> {
        if limits.batch_size == 0 {
            return Err(RagError::invalid("batch_size must be > 0"));
        }
        if limits.generation_timeout.is_zero() {
            return Err(RagError::invalid("generation timeout must be > 0"));
        }
        let retriever = Retriever::new(
            Arc::clone(&embedder),
            Arc::clone(&index),
            settings.similarity_threshold(),
            limits.embed_timeout,
        )?;
        Ok(Self {
            settings,
            limits,
            embedder,
            composer,
            index,
            retriever,
        })
    }

    /// Construct providers from configuration around an empty index.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let composer = create_composer(&config.generation)?;
        Ok(Self::new(
            config.pipeline_settings()?,
            CallLimits::from_config(config),
            embedder,
            composer,
            Arc::new(SharedIndex::default()),
        )?)
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn index(&self) -> &Arc<SharedIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Split every document with the configured window.
    pub fn chunk_documents(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for doc in documents {
            let doc_chunks =
                chunk_document(doc, self.settings.max_size(), self.settings.overlap())?;
            log::debug!("Chunked {} into {} chunks", doc.id, doc_chunks.len());
            chunks.extend(doc_chunks);
        }
        Ok(chunks)
    }

    pub async fn build_index(&self, documents: &[Document]) -> Result<BuildReport> {
        self.build_index_with_cancel(documents, &CancellationToken::new())
            .await
    }

    /// Chunk, embed and index `documents`, then swap the new index in.
    ///
    /// The served index is only replaced once every batch has succeeded; on
    /// any error the previous index keeps serving.
    pub async fn build_index_with_cancel(
        &self,
        documents: &[Document],
        cancel: &CancellationToken,
    ) -> Result<BuildReport> {
        let chunks = self.chunk_documents(documents)?;
        log::info!(
            "Building index: {} documents, {} chunks",
            documents.len(),
            chunks.len()
        );

        let model = self.embedder.model_name().to_string();
        let mut index = match self.embedder.dims() {
            0 => VectorIndex::new(model),
            dims => VectorIndex::with_dims(model, dims)?,
        };

        let mut batches = 0usize;
        for batch in chunks.chunks(self.limits.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = bounded(
                "batch embedding",
                self.limits.embed_timeout,
                cancel,
                self.embedder.embed_batch(&texts),
            )
            .await?;
            let vectors = check_batch(batch.len(), vectors)?;

            let records = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddingRecord::from_chunk(chunk, vector))
                .collect();
            index.add(records)?;
            batches += 1;
            log::debug!("Embedded batch {} ({} chunks)", batches, batch.len());
        }

        let report = BuildReport {
            documents: documents.len(),
            chunks: index.len(),
            batches,
            dims: index.dims().unwrap_or(0),
        };
        self.index.replace(index);
        log::info!(
            "Index ready: {} chunks, dims {}",
            report.chunks,
            report.dims
        );
        Ok(report)
    }

    /// Retrieve with the configured `top_k` and context budget.
    pub async fn retrieve(&self, query: &str, cancel: &CancellationToken) -> Result<RetrievedContext> {
        self.retriever
            .retrieve_with_cancel(
                query,
                self.settings.top_k(),
                self.settings.max_context_chars(),
                cancel,
            )
            .await
    }

    /// Raw ranked hits for `query`, before threshold and budget.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredRecord>> {
        self.retriever
            .search(query, top_k, &CancellationToken::new())
            .await
    }

    pub async fn ask(&self, question: &str) -> Result<Answer> {
        self.ask_with_cancel(question, &CancellationToken::new())
            .await
    }

    /// Answer `question` from retrieved evidence.
    ///
    /// When nothing survives retrieval the fixed insufficient-evidence
    /// answer is returned with `grounded = false` and the composer is not
    /// called.
    pub async fn ask_with_cancel(&self, question: &str, cancel: &CancellationToken) -> Result<Answer> {
        let context = self.retrieve(question, cancel).await?;

        if context.is_empty() {
            log::info!(
                "No evidence for question ({} candidates, {} below threshold)",
                context.candidates,
                context.below_threshold
            );
            return Ok(Answer {
                question: question.to_string(),
                text: INSUFFICIENT_EVIDENCE.to_string(),
                grounded: false,
                context,
            });
        }

        let text = bounded(
            "answer generation",
            self.limits.generation_timeout,
            cancel,
            self.composer.generate(question, &context.text),
        )
        .await?;

        Ok(Answer {
            question: question.to_string(),
            text,
            grounded: true,
            context,
        })
    }
}
