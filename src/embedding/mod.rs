//! The one concrete [`Embedder`](crate::interfaces::Embedder) this crate
//! ships: local inference via fastembed (primary platforms) or tract
//! (musl/Intel Mac fallback, `local-embeddings-tract` feature). Models are
//! downloaded once from Hugging Face and cached; after that, no network
//! calls are made — matching the "no network I/O at runtime" requirement.
//! Production deployments may swap in any other [`Embedder`] implementation,
//! e.g. an FFI binding to llama.cpp's embedding mode.

#[cfg(feature = "local-embeddings-tract")]
mod local_tract;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::RagError;
use crate::interfaces::Embedder;

/// Resolve a configured model name to its known output dimensionality.
/// Unknown names fall back to 384 unless `config.dims` overrides it.
fn resolve_dims(config: &EmbeddingConfig) -> usize {
    config.dims.unwrap_or(match config.model.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => 384,
    })
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// Local embedder backed by fastembed, the primary-platform backend.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct FastEmbedEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: tokio::sync::Mutex<fastembed::TextEmbedding>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl FastEmbedEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let fastembed_model = config_to_fastembed_model(&config.model)?;
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("failed to initialize local embedding model: {}", e))?;
        Ok(Self {
            model_name: config.model.clone(),
            dims: resolve_dims(config),
            batch_size: config.batch_size,
            model: tokio::sync::Mutex::new(model),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for FastEmbedEmbedder {
    fn dim(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, RagError> {
        let text = text.to_string();
        let batch_size = self.batch_size;
        let mut guard = self.model.lock().await;
        let model = &mut *guard;
        tokio::task::block_in_place(|| {
            let mut embeddings = model
                .embed(vec![text], Some(batch_size))
                .map_err(|e| RagError::EmbeddingFailed(e.to_string()))?;
            embeddings
                .pop()
                .ok_or_else(|| RagError::EmbeddingFailed("empty embedding response".to_string()))
        })
    }
}

#[cfg(feature = "local-embeddings-tract")]
pub use local_tract::TractEmbedder;
