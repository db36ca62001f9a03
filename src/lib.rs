//! # RAG Harness
//!
//! Chunking and retrieval core for retrieval-augmented question answering
//! over a small, fixed corpus.
//!
//! Documents are split into overlapping windows, embedded, and stored in an
//! exact cosine-similarity index. Questions are embedded, matched against
//! the index, filtered by a similarity floor, and packed into a bounded
//! context handed to an answer generator. When no evidence survives, the
//! caller gets an explicit "insufficient evidence" answer instead of a
//! generated one.
//!
//! ## Architecture
//!
//! ```text
//! build:  Document ──▶ Chunker ──▶ Embedder ──▶ VectorIndex ──▶ index.json
//!
//! query:  question ──▶ Embedder ──▶ VectorIndex.search ──▶ Retriever
//!                                                           │ threshold + budget
//!                                                           ▼
//!                                      RetrievedContext ──▶ AnswerComposer ──▶ Answer
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag stats                       # inspect how the corpus chunks
//! rag index build                 # chunk + embed + persist
//! rag search "self-attention"     # ranked hits
//! rag ask "What is self-attention?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`error`] | Error taxonomy |
//! | [`config`] | TOML configuration and validated pipeline settings |
//! | [`models`] | Core data types |
//! | [`chunk`] | Overlapping window chunker |
//! | [`embedding`] | Embedder capability and providers |
//! | [`upstream`] | Deadlines, cancellation, retry policy |
//! | [`index`] | Vector index, persistence, swap handle |
//! | [`retriever`] | Query-time retrieval and context assembly |
//! | [`answer`] | Answer composer capability and prompt |
//! | [`pipeline`] | Build and ask orchestration |
//! | [`corpus`] | Document loading and chunk files |
//! | [`stats`] | Chunk quality analysis |
//! | [`index_cmd`] | `rag chunk`, `rag index build/info` |
//! | [`query_cmd`] | `rag search`, `rag ask` |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod index;
pub mod index_cmd;
pub mod models;
pub mod pipeline;
pub mod query_cmd;
pub mod retriever;
pub mod stats;
pub mod upstream;
