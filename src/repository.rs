//! Public API: document lifecycle, retrieval orchestration, and the
//! per-document cache that makes repeated queries against an unchanged
//! store cheap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::stream::{self, BoxStream, StreamExt};
use lru::LruCache;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{Config, RouterConfig};
use crate::embedder::EmbedderFacade;
use crate::error::{RagError, Result};
use crate::interfaces::{DocumentSource, Embedder, LLMChat, Message};
use crate::models::{DocRecord, DocStatus, RetrievalHit};
use crate::router::RouterState;
use crate::store::LocalRagStore;
use crate::vector::dot_packed_le;
use crate::worker::WorkerPool;

/// Outcome of [`RagRepository::build_prompt`]: either the templated prompt
/// ready to send to the model, or a user-visible explanation that should be
/// shown instead of making a model call at all (keyword-suggests-a-document
/// intent, but no document is READY yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Ready(String),
    Explain(String),
}

/// A validated per-document cache entry: chunk text plus packed embedding
/// bytes, kept only as long as both files' mtimes match what was loaded.
struct DocCacheEntry {
    chunks: Vec<crate::models::Chunk>,
    packed: Vec<u8>,
    bytes_per_vec: usize,
    dim: usize,
    chunks_mtime: SystemTime,
    emb_mtime: SystemTime,
}

pub struct RagRepository {
    store: Arc<LocalRagStore>,
    embedder: Arc<EmbedderFacade>,
    workers: WorkerPool,
    doc_cache: Mutex<LruCache<String, DocCacheEntry>>,
    retrieval_top_k: usize,
    retrieval_threshold: f64,
    context_max_chars: usize,
    context_per_doc_cap: usize,
    router_config: RouterConfig,
}

impl RagRepository {
    pub fn new(config: &Config) -> Result<Self> {
        let store = Arc::new(LocalRagStore::new(&config.store.root)?);
        let embedder = Arc::new(EmbedderFacade::new(config.cache.query_cache_capacity));
        let workers = WorkerPool::with_staging_cap(
            store.clone(),
            embedder.clone(),
            config.chunking.clone(),
            config.embedding.clone(),
            config.worker.resolved_max_concurrent(),
            config.store.staging_size_cap_bytes,
        );
        let capacity = NonZeroUsize::new(config.cache.doc_cache_capacity.max(1)).unwrap();
        Ok(Self {
            store,
            embedder,
            workers,
            doc_cache: Mutex::new(LruCache::new(capacity)),
            retrieval_top_k: config.retrieval.top_k,
            retrieval_threshold: config.retrieval.threshold,
            context_max_chars: config.retrieval.context_max_chars,
            context_per_doc_cap: config.retrieval.context_per_doc_cap,
            router_config: config.router.clone(),
        })
    }

    pub async fn attach_embedder(&self, embedder: Arc<dyn Embedder>) {
        self.embedder.attach(embedder).await;
    }

    /// Stage and enqueue each source for indexing. Returns the assigned doc
    /// ids in submission order.
    pub async fn add_documents(&self, sources: Vec<Box<dyn DocumentSource>>) -> Vec<String> {
        let mut ids = Vec::with_capacity(sources.len());
        for source in sources {
            let doc_id = Uuid::new_v4().to_string();
            let record = DocRecord {
                doc_id: doc_id.clone(),
                uri: source.display_name().to_string(),
                name: source.display_name().to_string(),
                mime: source.mime_hint().to_string(),
                size_bytes: source.size_bytes(),
                created_at_ms: now_ms(),
                status: DocStatus::Indexing,
                error: None,
                dim: None,
            };
            self.workers.submit(doc_id.clone(), record, source).await;
            ids.push(doc_id);
        }
        ids
    }

    pub async fn remove_document(&self, doc_id: &str) -> Result<()> {
        self.workers.cancel(doc_id).await;
        self.store.delete_doc(doc_id)?;
        self.invalidate_cache(doc_id).await;
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.workers.cancel_all().await;
        self.store.delete_all()?;
        self.clear_cache().await;
        Ok(())
    }

    pub fn snapshot_docs(&self) -> Result<Vec<DocRecord>> {
        self.store.list_docs()
    }

    /// A lazy, infinite sequence of doc-list snapshots, polling every
    /// `period` and emitting only when the list differs (by structural
    /// equality) from the last emitted snapshot.
    pub fn observe_docs(&self, period: Duration) -> BoxStream<'static, Vec<DocRecord>> {
        let store = self.store.clone();
        stream::unfold(None::<Vec<DocRecord>>, move |last| {
            let store = store.clone();
            async move {
                loop {
                    tokio::time::sleep(period).await;
                    let current = store.list_docs().unwrap_or_default();
                    if last.as_ref() != Some(&current) {
                        return Some((current.clone(), Some(current)));
                    }
                }
            }
        })
        .boxed()
    }

    pub async fn doc_stats(&self, doc_id: &str) -> Result<crate::models::DocStats> {
        self.store.doc_stats(doc_id)
    }

    pub async fn invalidate_cache(&self, doc_id: &str) {
        self.doc_cache.lock().await.pop(doc_id);
    }

    pub async fn clear_cache(&self) {
        self.doc_cache.lock().await.clear();
    }

    /// Embed `query` once and rank chunks across all READY documents (or a
    /// single document when `filter_doc_id` is set) by dot product,
    /// returning the top `k` above `threshold`.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        threshold: f64,
        filter_doc_id: Option<&str>,
    ) -> Result<Vec<RetrievalHit>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let qvec = self.embedder.embed_query(trimmed).await?;
        let docs: Vec<DocRecord> = self
            .store
            .list_docs()?
            .into_iter()
            .filter(|d| d.status == DocStatus::Ready)
            .filter(|d| filter_doc_id.map(|id| id == d.doc_id).unwrap_or(true))
            .collect();

        let mut heap: BinaryHeap<ScoredHit> = BinaryHeap::with_capacity(k + 1);

        for doc in &docs {
            let entry = match self.load_or_refresh(doc, qvec.len()).await {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(doc_id = %doc.doc_id, error = %e, "excluding corrupt document from retrieval");
                    continue;
                }
            };

            for chunk in &entry.chunks {
                let offset = chunk.chunk_index * entry.bytes_per_vec;
                let score = match dot_packed_le(&qvec, &entry.packed, offset, entry.dim) {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                if score <= threshold {
                    continue;
                }
                let hit = RetrievalHit {
                    doc_id: doc.doc_id.clone(),
                    doc_name: doc.name.clone(),
                    chunk_id: chunk.chunk_id.clone(),
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    score,
                    doc_created_at_ms: doc.created_at_ms,
                };
                push_bounded(&mut heap, hit, k);
            }
        }

        let mut hits: Vec<RetrievalHit> = heap.into_sorted_vec().into_iter().map(|s| s.0).collect();
        hits.reverse();
        Ok(hits)
    }

    /// First-N chunks of a document with a fixed score of 1.0 — used when
    /// similarity search yields nothing but the caller still wants
    /// something to show for a locked document.
    pub async fn fallback_top_chunks(&self, doc_id: &str, max: usize) -> Result<Vec<RetrievalHit>> {
        let doc = self
            .store
            .read_meta(doc_id)
            .map_err(|_| RagError::NotFound(doc_id.to_string()))?;
        let loaded = self.store.read_chunks(doc_id)?;
        Ok(loaded
            .chunks
            .into_iter()
            .take(max)
            .map(|c| RetrievalHit {
                doc_id: doc.doc_id.clone(),
                doc_name: doc.name.clone(),
                chunk_id: c.chunk_id,
                chunk_index: c.chunk_index,
                text: c.text,
                score: 1.0,
                doc_created_at_ms: doc.created_at_ms,
            })
            .collect())
    }

    /// Deterministic, size-bounded context block: hits deduplicated and
    /// grouped by document, capped per document, truncated to fit
    /// `max_chars`.
    pub fn build_context_block(&self, hits: &[RetrievalHit], max_chars: usize) -> Option<String> {
        crate::router::build_context_block(hits, max_chars, self.context_per_doc_cap)
    }

    pub fn retrieval_defaults(&self) -> (usize, f64, usize) {
        (self.retrieval_top_k, self.retrieval_threshold, self.context_max_chars)
    }

    /// Run the full router pipeline for one turn: retrieve, decide whether
    /// to inject document context, assemble and window the prompt, and
    /// template it for `llm`. Returns [`PromptOutcome::Explain`] instead of
    /// calling into retrieval at all when the query suggests document intent
    /// but no document is READY yet.
    pub async fn build_prompt(
        &self,
        state: &mut RouterState,
        messages: &[Message],
        user_query: &str,
        llm: &dyn LLMChat,
    ) -> Result<PromptOutcome> {
        let docs = self.snapshot_docs()?;
        if let Some(explanation) =
            crate::router::explain_if_no_usable_document(user_query, &docs, &self.router_config.keywords)
        {
            return Ok(PromptOutcome::Explain(explanation));
        }

        let locked = state.locked_doc_id().map(|s| s.to_string());
        let hits = self
            .retrieve(user_query, self.retrieval_top_k, self.retrieval_threshold, locked.as_deref())
            .await?;
        let best_score = hits.first().map(|h| h.score).unwrap_or(0.0);
        let doc_id_hint = hits.first().map(|h| h.doc_id.as_str()).or(locked.as_deref());

        let prompt = crate::router::build_prompt(
            state,
            &self.router_config,
            &hits,
            best_score,
            doc_id_hint,
            self.context_max_chars,
            self.context_per_doc_cap,
            messages,
            user_query,
            llm,
        );
        Ok(PromptOutcome::Ready(prompt))
    }

    async fn load_or_refresh(&self, doc: &DocRecord, query_dim: usize) -> Result<Arc<DocCacheEntryView>> {
        let loaded_chunks = self.store.read_chunks(&doc.doc_id)?;
        let loaded_emb = self.store.read_embeddings(&doc.doc_id)?;

        {
            let mut cache = self.doc_cache.lock().await;
            if let Some(entry) = cache.get(&doc.doc_id) {
                if entry.chunks_mtime == loaded_chunks.mtime
                    && entry.emb_mtime == loaded_emb.mtime
                    && entry.dim == query_dim
                {
                    return Ok(Arc::new(DocCacheEntryView {
                        chunks: entry.chunks.clone(),
                        packed: entry.packed.clone(),
                        bytes_per_vec: entry.bytes_per_vec,
                        dim: entry.dim,
                    }));
                }
            }
        }

        let chunk_count = loaded_chunks.chunks.len();
        let bytes_per_vec = self
            .store
            .bytes_per_vector(&doc.doc_id, chunk_count, loaded_emb.bytes.len() as u64)? as usize;
        let dim = bytes_per_vec / 4;

        if let Some(persisted_dim) = doc.dim {
            if persisted_dim != dim {
                return Err(RagError::InvalidFormat { expected: persisted_dim, got: dim });
            }
        }
        if dim != query_dim {
            return Err(RagError::InvalidFormat { expected: query_dim, got: dim });
        }

        let entry = DocCacheEntry {
            chunks: loaded_chunks.chunks.clone(),
            packed: loaded_emb.bytes.clone(),
            bytes_per_vec,
            dim,
            chunks_mtime: loaded_chunks.mtime,
            emb_mtime: loaded_emb.mtime,
        };
        let view = DocCacheEntryView {
            chunks: entry.chunks.clone(),
            packed: entry.packed.clone(),
            bytes_per_vec: entry.bytes_per_vec,
            dim: entry.dim,
        };
        self.doc_cache.lock().await.put(doc.doc_id.clone(), entry);
        Ok(Arc::new(view))
    }
}

/// Plain clone of the fields retrieval needs, returned from the cache so the
/// lock isn't held while scoring chunks.
struct DocCacheEntryView {
    chunks: Vec<crate::models::Chunk>,
    packed: Vec<u8>,
    bytes_per_vec: usize,
    dim: usize,
}

/// Min-ordered wrapper so a max-heap of bounded size keeps the `k` best
/// scores; ties broken by document recency then chunk index, matching the
/// retrieval algorithm's tie-break rule.
struct ScoredHit(RetrievalHit);

impl PartialEq for ScoredHit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_key() == other.cmp_key()
    }
}
impl Eq for ScoredHit {}
impl PartialOrd for ScoredHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScoredHit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_key().cmp(&other.cmp_key())
    }
}

impl ScoredHit {
    fn cmp_key(&self) -> (ordered_float::NotNan<f64>, i64, std::cmp::Reverse<usize>) {
        (
            ordered_float::NotNan::new(self.0.score).unwrap_or(ordered_float::NotNan::new(0.0).unwrap()),
            self.0.doc_created_at_ms,
            std::cmp::Reverse(self.0.chunk_index),
        )
    }
}

/// Push into a size-bounded max-heap-as-min-heap: once at capacity, only
/// displaces the current minimum if the candidate ranks higher.
fn push_bounded(heap: &mut BinaryHeap<ScoredHit>, hit: RetrievalHit, k: usize) {
    if k == 0 {
        return;
    }
    let candidate = ScoredHit(hit);
    if heap.len() < k {
        heap.push(candidate);
        return;
    }
    // BinaryHeap is a max-heap; to bound it at k smallest-kept-out we need
    // the *minimum* accessible cheaply. Rebuild via a reverse comparison by
    // temporarily draining — acceptable at k in the 1-100 range this crate
    // targets.
    let mut items: Vec<ScoredHit> = heap.drain().collect();
    items.push(candidate);
    items.sort_by(|a, b| b.cmp(a));
    items.truncate(k);
    for item in items {
        heap.push(item);
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
