//! Error taxonomy for the RAG core.
//!
//! Library code returns [`RagError`] so callers can match on kind; the demo
//! binary and other orchestration glue wrap these in `anyhow::Result` for
//! CLI-level reporting, the same split the rest of the crate uses.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("extraction produced no text")]
    ExtractionEmpty,

    #[error("extraction produced too little text ({chars} chars, minimum {min})")]
    ExtractionTooShort { chars: usize, min: usize },

    #[error("extraction is too repetitive (unique line ratio {ratio:.2}, minimum {min:.2})")]
    ExtractionTooRepetitive { ratio: f64, min: f64 },

    #[error("chunking produced no chunks")]
    ChunkingProducedNone,

    #[error("embedder is not attached")]
    EmbedderNotReady,

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("invalid embedding dimensions: expected {expected}, got {got}")]
    InvalidFormat { expected: usize, got: usize },

    #[error("source too large: {size} bytes exceeds cap of {cap} bytes")]
    SourceTooLarge { size: u64, cap: u64 },

    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RagError>;
