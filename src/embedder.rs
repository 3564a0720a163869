//! Lazy-attached embedder wrapper: L2-normalizes every vector it returns and
//! caches query embeddings behind a bounded LRU so repeated questions in a
//! chat turn don't re-run the model.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;

use crate::error::{RagError, Result};
use crate::interfaces::Embedder;
use crate::vector::normalize_l2;

/// Wraps an [`Embedder`] with lazy attachment, unit normalization, and a
/// query-side LRU cache. Chunk embeddings computed by the indexing worker
/// bypass the cache entirely — they're computed once and persisted.
pub struct EmbedderFacade {
    inner: Mutex<Option<Arc<dyn Embedder>>>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbedderFacade {
    pub fn new(query_cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(query_cache_capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(None),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Attach the concrete embedder. Idempotent: a second call with a
    /// different embedder replaces the first and clears the query cache,
    /// since cached vectors are only valid for the embedder that produced
    /// them.
    pub async fn attach(&self, embedder: Arc<dyn Embedder>) {
        let mut guard = self.inner.lock().await;
        *guard = Some(embedder);
        drop(guard);
        self.cache.lock().await.clear();
    }

    pub async fn detach(&self) {
        *self.inner.lock().await = None;
        self.cache.lock().await.clear();
    }

    pub async fn is_attached(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    pub async fn dim(&self) -> Option<usize> {
        self.inner.lock().await.as_ref().map(|e| e.dim())
    }

    /// Embed a chunk of persisted document text. Never touches the query
    /// cache.
    pub async fn embed_chunk(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_uncached(text).await
    }

    /// Embed a query, serving from the LRU cache when possible. Cache hits
    /// return a defensive copy so callers can't mutate the cached vector.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let key = cache_key(query);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            return Ok(hit.clone());
        }
        let vec = self.embed_uncached(query).await?;
        self.cache.lock().await.put(key, vec.clone());
        Ok(vec)
    }

    async fn embed_uncached(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = {
            let guard = self.inner.lock().await;
            guard.clone().ok_or(RagError::EmbedderNotReady)?
        };
        let mut vec = embedder.embed(text).await?;
        normalize_l2(&mut vec);
        Ok(vec)
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }
}

fn cache_key(query: &str) -> String {
    query.trim().to_lowercase().chars().take(256).collect()
}
