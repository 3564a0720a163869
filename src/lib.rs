//! # local-rag-core
//!
//! **An offline retrieval-augmented-generation core for a device-side LLM
//! assistant.**
//!
//! This crate turns a pile of local documents (PDF, Office formats, plain
//! text, Markdown, CSV, JSON, XML) into a queryable knowledge base: extract
//! text, normalize it, chunk it, embed each chunk with a local model, and
//! rank chunks by exact dot-product similarity at query time. There is no
//! network I/O anywhere in this crate's runtime path.
//!
//! ## Architecture
//!
//! ```text
//! DocumentSource ──▶ extract ──▶ normalize ──▶ gate_quality ──▶ chunk
//!                                                                  │
//!                                                                  ▼
//!                                                              embed each
//!                                                                  │
//!                                                                  ▼
//!                                                        LocalRagStore (disk)
//!                                                                  │
//!             RagRepository::retrieve ◀── EmbedderFacade::embed_query
//!                     │
//!                     ▼
//!             router::build_context_block + inject_context
//! ```
//!
//! ## Data flow
//!
//! 1. A caller hands [`repository::RagRepository::add_documents`] one or more
//!    [`interfaces::DocumentSource`]s. Each is assigned a doc id and handed to
//!    the [`worker::WorkerPool`], which runs extraction, normalization,
//!    quality gating, chunking, and embedding as a cancellable background
//!    job, then persists the result via [`store::LocalRagStore`].
//! 2. [`repository::RagRepository::retrieve`] embeds a query once through
//!    [`embedder::EmbedderFacade`], loads each ready document's chunks and
//!    packed embeddings from an mtime-validated in-process cache, and ranks
//!    chunks by [`vector::dot_packed_le`].
//! 3. [`router`] decides whether a chat turn needs document context at all,
//!    assembles a citation-tagged context block bounded by character budget,
//!    and injects it into the latest user message before the turn reaches
//!    the caller's [`interfaces::LLMChat`] implementation.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | The crate's error type, `RagError` |
//! | [`models`] | Core data types: `DocRecord`, `Chunk`, `RetrievalHit` |
//! | [`vector`] | Float32 packing and exact dot-product similarity |
//! | [`normalize`] | Text normalization (line endings, whitespace, NULs) |
//! | [`chunk`] | Sentence/paragraph/word-boundary chunker with overlap |
//! | [`extract`] | Multi-format text extraction and the quality gate |
//! | [`store`] | Content-addressed, atomic-write per-document disk store |
//! | [`interfaces`] | External seams this crate consumes: `Embedder`, `LLMChat`, `DocumentSource` |
//! | [`embedding`] | Concrete local `Embedder` implementations (fastembed, tract) |
//! | [`embedder`] | `EmbedderFacade`: lazy attach, normalization, query cache |
//! | [`worker`] | Cancellable background indexing jobs |
//! | [`repository`] | Public API: document lifecycle and retrieval |
//! | [`router`] | Context injection decision, assembly, and prompt windowing |
//!
//! ## Configuration
//!
//! local-rag-core is configured via a TOML file (default:
//! `./config/rag.toml`). See [`config`] for all available options and
//! [`config::load_config`] for validation rules.

pub mod chunk;
pub mod config;
pub mod embedder;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod interfaces;
pub mod models;
pub mod normalize;
pub mod repository;
pub mod router;
pub mod store;
pub mod vector;
pub mod worker;

pub use error::{RagError, Result};
pub use repository::RagRepository;
