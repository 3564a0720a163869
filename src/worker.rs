//! Background, cancellable, per-document indexing jobs.
//!
//! Each submitted document gets a worker uniquely keyed by `doc_id`:
//! resubmitting the same id cancels any in-flight job for it before starting
//! a new one. A bounded semaphore caps how many jobs run concurrently; the
//! embedder itself is a single serialized resource (see
//! [`crate::embedder::EmbedderFacade`]), so the semaphore bounds
//! extraction/chunking parallelism, not embedding throughput.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, EmbeddingConfig};
use crate::embedder::EmbedderFacade;
use crate::error::{RagError, Result};
use crate::extract::{extract_text, gate_quality};
use crate::interfaces::DocumentSource;
use crate::models::{DocRecord, DocStatus};
use crate::normalize::normalize;
use crate::store::LocalRagStore;
use crate::vector::pack;

pub struct WorkerPool {
    store: Arc<LocalRagStore>,
    embedder: Arc<EmbedderFacade>,
    chunking: ChunkingConfig,
    #[allow(dead_code)]
    embedding: EmbeddingConfig,
    staging_cap_bytes: u64,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>,
    generation: AtomicU64,
}

impl WorkerPool {
    pub fn new(
        store: Arc<LocalRagStore>,
        embedder: Arc<EmbedderFacade>,
        chunking: ChunkingConfig,
        embedding: EmbeddingConfig,
        max_concurrent: usize,
    ) -> Self {
        Self::with_staging_cap(store, embedder, chunking, embedding, max_concurrent, 100 * 1024 * 1024)
    }

    pub fn with_staging_cap(
        store: Arc<LocalRagStore>,
        embedder: Arc<EmbedderFacade>,
        chunking: ChunkingConfig,
        embedding: EmbeddingConfig,
        max_concurrent: usize,
        staging_cap_bytes: u64,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
            embedding,
            staging_cap_bytes,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Submit a document for indexing, replacing any in-flight job for the
    /// same `doc_id`. Returns once the job has been spawned, not once it
    /// completes; poll [`crate::store::LocalRagStore::read_meta`] for
    /// status.
    pub async fn submit(&self, doc_id: String, record: DocRecord, source: Box<dyn DocumentSource>) {
        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut guard = self.in_flight.lock().await;
            if let Some((_, old)) = guard.insert(doc_id.clone(), (generation, cancel.clone())) {
                old.cancel();
            }
        }

        if let Err(e) = self.store.create_indexing(&record) {
            warn!(doc_id, error = %e, "failed to write initial doc record");
            return;
        }

        let store = self.store.clone();
        let embedder = self.embedder.clone();
        let chunking = self.chunking.clone();
        let staging_cap_bytes = self.staging_cap_bytes;
        let semaphore = self.semaphore.clone();
        let in_flight = self.in_flight.clone();
        let job_doc_id = doc_id.clone();
        let job_cancel = cancel.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = run_job(
                &store,
                &embedder,
                &chunking,
                &job_doc_id,
                source.as_ref(),
                staging_cap_bytes,
                &job_cancel,
            )
            .await;
            if let Err(e) = &result {
                if matches!(e, RagError::Cancelled) {
                    info!(doc_id = %job_doc_id, "indexing job cancelled");
                } else {
                    warn!(doc_id = %job_doc_id, error = %e, "indexing job failed");
                    let _ = mark_failed(&store, &job_doc_id, &e.to_string());
                }
            }
            // Only clear the slot if it's still the generation we started
            // with — a resubmission since then already owns the slot.
            let mut guard = in_flight.lock().await;
            if matches!(guard.get(&job_doc_id), Some((gen, _)) if *gen == generation) {
                guard.remove(&job_doc_id);
            }
        });
    }

    pub async fn cancel(&self, doc_id: &str) {
        if let Some((_, token)) = self.in_flight.lock().await.remove(doc_id) {
            token.cancel();
        }
    }

    pub async fn cancel_all(&self) {
        let mut guard = self.in_flight.lock().await;
        for (_, (_, token)) in guard.drain() {
            token.cancel();
        }
    }
}

#[instrument(skip(store, embedder, chunking, source, cancel), fields(doc_id))]
async fn run_job(
    store: &LocalRagStore,
    embedder: &EmbedderFacade,
    chunking: &ChunkingConfig,
    doc_id: &str,
    source: &dyn DocumentSource,
    staging_cap_bytes: u64,
    cancel: &CancellationToken,
) -> Result<()> {
    if !embedder.is_attached().await {
        return Err(RagError::EmbedderNotReady);
    }
    check_cancelled(cancel)?;

    let mut bytes = Vec::new();
    {
        use std::io::Read;
        let mut reader = source.open()?;
        reader.read_to_end(&mut bytes)?;
    }
    check_cancelled(cancel)?;

    // Copy into the staging directory so the rest of this job depends only
    // on a durable local file, not the caller's (possibly ephemeral) stream.
    store.stage_source(doc_id, &bytes, staging_cap_bytes)?;
    check_cancelled(cancel)?;

    let raw = extract_text(&bytes, source.mime_hint(), source.display_name())?;
    let normalized = normalize(&raw);
    check_cancelled(cancel)?;

    let gated = gate_quality(&normalized)?;
    check_cancelled(cancel)?;

    let chunks = chunk_text(doc_id, &gated, chunking.target_chars, chunking.overlap_chars);
    if chunks.is_empty() {
        return Err(RagError::ChunkingProducedNone);
    }
    info!(doc_id, chunk_count = chunks.len(), "chunked document");

    let mut packed = Vec::new();
    let mut dim = None;
    for (i, chunk) in chunks.iter().enumerate() {
        check_cancelled(cancel)?;
        let vec = embedder.embed_chunk(&chunk.text).await?;
        match dim {
            None => dim = Some(vec.len()),
            Some(expected) if expected != vec.len() => {
                return Err(RagError::InvalidFormat { expected, got: vec.len() });
            }
            _ => {}
        }
        packed.extend(pack(&vec));
        if i % 16 == 0 {
            tracing::debug!(doc_id, chunk_index = i, "embedded chunk");
        }
    }

    check_cancelled(cancel)?;
    store.write_chunks_and_embeddings(doc_id, &chunks, &packed)?;

    let mut meta = store.read_meta(doc_id)?;
    meta.status = DocStatus::Ready;
    meta.error = None;
    meta.dim = dim;
    store.write_meta(&meta)?;
    store.remove_staged(doc_id);

    info!(doc_id, "document ready");
    Ok(())
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(RagError::Cancelled)
    } else {
        Ok(())
    }
}

fn mark_failed(store: &LocalRagStore, doc_id: &str, error: &str) -> Result<()> {
    let mut meta = store.read_meta(doc_id)?;
    meta.status = DocStatus::Failed;
    meta.error = Some(error.chars().take(500).collect());
    store.write_meta(&meta)
}
