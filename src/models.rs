//! Core data types that flow through the ingestion and retrieval pipeline:
//! document records, chunks, and retrieval hits.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a document in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocStatus {
    Indexing,
    Ready,
    Failed,
}

/// Persisted document metadata (`meta.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocRecord {
    #[serde(rename = "docId")]
    pub doc_id: String,
    pub uri: String,
    pub name: String,
    pub mime: String,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    #[serde(rename = "createdAt")]
    pub created_at_ms: i64,
    pub status: DocStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Embedding dimensionality, persisted going forward (see the
    /// dimension-stability note); absent on stores written before this field
    /// existed, in which case the store falls back to inferring it from
    /// `embeddings.bin`'s length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
}

/// One line of `chunks.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "chunkId")]
    pub chunk_id: String,
    #[serde(rename = "chunkIndex")]
    pub chunk_index: usize,
    pub text: String,
}

/// One scored retrieval result, ready for context assembly.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub doc_id: String,
    pub doc_name: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f64,
    pub doc_created_at_ms: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct DocStats {
    pub chunk_count: usize,
    pub embedding_bytes: u64,
    pub total_bytes: u64,
}
