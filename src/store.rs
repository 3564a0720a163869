//! Append-only, per-document folder store.
//!
//! Layout:
//!
//! ```text
//! <root>/rag/docs/<doc_id>/
//!     meta.json
//!     chunks.jsonl
//!     embeddings.bin
//! ```
//!
//! Every write goes to a sibling `<name>.tmp`, is flushed, then renamed over
//! the target so a crash mid-write leaves the previous (or no) file in
//! place, never a half-written one.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json;

use crate::error::{RagError, Result};
use crate::models::{Chunk, DocRecord, DocStats};

pub struct LocalRagStore {
    root: PathBuf,
}

/// Chunks plus mtime, used by the repository's per-doc cache to decide
/// whether a cached entry is still valid.
pub struct LoadedChunks {
    pub chunks: Vec<Chunk>,
    pub mtime: SystemTime,
}

/// Raw embedding bytes plus mtime, same purpose as [`LoadedChunks`].
pub struct LoadedEmbeddings {
    pub bytes: Vec<u8>,
    pub mtime: SystemTime,
}

impl LocalRagStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("rag").join("docs"))?;
        fs::create_dir_all(root.join("rag").join("staging"))?;
        Ok(Self { root })
    }

    fn docs_dir(&self) -> PathBuf {
        self.root.join("rag").join("docs")
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("rag").join("staging")
    }

    /// Path a source's bytes are copied to before indexing, so a long-running
    /// worker doesn't depend on an ephemeral caller-owned stream.
    pub fn staged_source_path(&self, doc_id: &str) -> PathBuf {
        self.staging_dir().join(doc_id)
    }

    /// Copy `bytes` into the staging directory for `doc_id`, rejecting
    /// anything over `cap_bytes`.
    pub fn stage_source(&self, doc_id: &str, bytes: &[u8], cap_bytes: u64) -> Result<PathBuf> {
        if bytes.len() as u64 > cap_bytes {
            return Err(RagError::SourceTooLarge {
                size: bytes.len() as u64,
                cap: cap_bytes,
            });
        }
        let path = self.staged_source_path(doc_id);
        atomic_write(&path, bytes)?;
        Ok(path)
    }

    /// Best-effort removal of a staged source file; failures are logged, not
    /// propagated, since the document is already durably indexed by the time
    /// this runs.
    pub fn remove_staged(&self, doc_id: &str) {
        let path = self.staged_source_path(doc_id);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(doc_id, error = %e, "failed to remove staged source file");
            }
        }
    }

    fn doc_dir(&self, doc_id: &str) -> PathBuf {
        self.docs_dir().join(doc_id)
    }

    fn meta_path(&self, doc_id: &str) -> PathBuf {
        self.doc_dir(doc_id).join("meta.json")
    }

    fn chunks_path(&self, doc_id: &str) -> PathBuf {
        self.doc_dir(doc_id).join("chunks.jsonl")
    }

    fn embeddings_path(&self, doc_id: &str) -> PathBuf {
        self.doc_dir(doc_id).join("embeddings.bin")
    }

    /// Create the folder and an INDEXING meta record for a new document.
    pub fn create_indexing(&self, record: &DocRecord) -> Result<()> {
        fs::create_dir_all(self.doc_dir(&record.doc_id))?;
        self.write_meta(record)
    }

    pub fn write_meta(&self, record: &DocRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        atomic_write(&self.meta_path(&record.doc_id), &json)
    }

    pub fn read_meta(&self, doc_id: &str) -> Result<DocRecord> {
        let bytes = fs::read(self.meta_path(doc_id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Persist the full chunk/embedding set for a document atomically
    /// (chunks first, then embeddings; the caller flips status to READY
    /// only after both succeed).
    pub fn write_chunks_and_embeddings(&self, doc_id: &str, chunks: &[Chunk], embeddings: &[u8]) -> Result<()> {
        let mut jsonl = Vec::new();
        for chunk in chunks {
            serde_json::to_writer(&mut jsonl, chunk)?;
            jsonl.push(b'\n');
        }
        atomic_write(&self.chunks_path(doc_id), &jsonl)?;
        atomic_write(&self.embeddings_path(doc_id), embeddings)?;
        Ok(())
    }

    pub fn read_chunks(&self, doc_id: &str) -> Result<LoadedChunks> {
        let path = self.chunks_path(doc_id);
        let meta = fs::metadata(&path)?;
        let content = fs::read_to_string(&path)?;
        let mut chunks = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            chunks.push(serde_json::from_str(line)?);
        }
        Ok(LoadedChunks {
            chunks,
            mtime: meta.modified()?,
        })
    }

    pub fn read_embeddings(&self, doc_id: &str) -> Result<LoadedEmbeddings> {
        let path = self.embeddings_path(doc_id);
        let meta = fs::metadata(&path)?;
        let bytes = fs::read(&path)?;
        Ok(LoadedEmbeddings {
            bytes,
            mtime: meta.modified()?,
        })
    }

    /// All readable document records, sorted newest-first. Unreadable
    /// folders are skipped with a warning rather than failing the call.
    pub fn list_docs(&self) -> Result<Vec<DocRecord>> {
        let mut records = Vec::new();
        let dir = self.docs_dir();
        if !dir.exists() {
            return Ok(records);
        }
        for entry in fs::read_dir(&dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read doc directory entry");
                    continue;
                }
            };
            if !entry.path().is_dir() {
                continue;
            }
            let doc_id = entry.file_name().to_string_lossy().into_owned();
            match self.read_meta(&doc_id) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(doc_id, error = %e, "skipping unreadable document record");
                }
            }
        }
        records.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        Ok(records)
    }

    pub fn doc_stats(&self, doc_id: &str) -> Result<DocStats> {
        let chunks = self.read_chunks(doc_id)?;
        let embeddings_path = self.embeddings_path(doc_id);
        let embedding_bytes = fs::metadata(&embeddings_path)?.len();
        let chunks_bytes = fs::metadata(self.chunks_path(doc_id))?.len();
        let meta_bytes = fs::metadata(self.meta_path(doc_id))?.len();
        Ok(DocStats {
            chunk_count: chunks.chunks.len(),
            embedding_bytes,
            total_bytes: embedding_bytes + chunks_bytes + meta_bytes,
        })
    }

    /// Bytes per packed vector for a document, derived from file sizes; used
    /// to infer embedding dimensionality when `meta.json` carries none. A
    /// non-integral ratio (chunk count doesn't evenly divide embedding
    /// bytes) marks the document corrupt.
    pub fn bytes_per_vector(&self, doc_id: &str, chunk_count: usize, embedding_bytes: u64) -> Result<u64> {
        if chunk_count == 0 {
            return Ok(0);
        }
        let count = chunk_count as u64;
        if embedding_bytes % count != 0 {
            return Err(RagError::InvalidFormat {
                expected: 0,
                got: embedding_bytes as usize,
            });
        }
        Ok(embedding_bytes / count)
    }

    pub fn delete_doc(&self, doc_id: &str) -> Result<()> {
        let dir = self.doc_dir(doc_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn delete_all(&self) -> Result<()> {
        for record in self.list_docs()? {
            self.delete_doc(&record.doc_id)?;
        }
        Ok(())
    }
}

/// Write `bytes` to `path` via a sibling `.tmp` file, fsync, then rename.
/// Falls back to copy-then-delete if the rename fails (e.g. cross-device).
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    {
        let mut file = fs::File::create(&tmp_path)?;
        use std::io::Write;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    if fs::rename(&tmp_path, path).is_err() {
        fs::copy(&tmp_path, path)?;
        fs::remove_file(&tmp_path)?;
    }
    Ok(())
}
