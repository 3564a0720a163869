//! Tract-based local embedding pipeline — the fallback backend for musl and
//! Intel Mac, where fastembed's bundled ONNX Runtime binaries aren't
//! available. Pure Rust: loads an ONNX model with tract-onnx, tokenizes with
//! the `tokenizers` crate, and runs inference in `spawn_blocking`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tract_onnx::prelude::*;

use crate::config::EmbeddingConfig;
use crate::error::RagError;
use crate::interfaces::Embedder;
use crate::vector::normalize_l2;

const ALL_MINILM_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";
const ALL_MINILM_DIMS: usize = 384;
const DEFAULT_MAX_LEN: usize = 256;

fn model_manifest(model_name: &str) -> Result<(&'static str, &'static str, usize)> {
    match model_name {
        "all-minilm-l6-v2" => Ok(("onnx/model.onnx", "tokenizer.json", ALL_MINILM_DIMS)),
        _ => bail!(
            "tract backend supports only all-minilm-l6-v2 for now. Requested: '{}'",
            model_name
        ),
    }
}

fn cache_dir() -> Result<PathBuf> {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let dir = PathBuf::from(base).join(".cache").join("local-rag-core").join("models");
    std::fs::create_dir_all(&dir).map_err(|e| anyhow::anyhow!("create cache dir: {}", e))?;
    Ok(dir)
}

fn ensure_cached(model_name: &str) -> Result<(PathBuf, PathBuf)> {
    let (onnx_rel, tokenizer_rel, _) = model_manifest(model_name)?;
    let dir = cache_dir()?;
    let model_dir = dir.join(model_name);
    let onnx_path = model_dir.join(onnx_rel);
    let tokenizer_path = model_dir.join(tokenizer_rel);
    if !onnx_path.exists() || !tokenizer_path.exists() {
        bail!(
            "model files for '{}' not found under {}; expected {} downloaded from {} ahead of time \
             (this crate performs no network I/O at runtime)",
            model_name,
            model_dir.display(),
            onnx_rel,
            ALL_MINILM_REPO
        );
    }
    Ok((onnx_path, tokenizer_path))
}

pub struct TractEmbedder {
    model_name: String,
    dims: usize,
    tokenizer: tokenizers::Tokenizer,
    runnable: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
}

impl TractEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config.model.clone();
        let (_, _, dims) = model_manifest(&model_name)?;
        let (onnx_path, tokenizer_path) = ensure_cached(&model_name)?;

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {}", e))?;

        let runnable = tract_onnx::onnx()
            .model_for_path(onnx_path)
            .map_err(|e| anyhow::anyhow!("load onnx: {}", e))?
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("optimize: {}", e))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("build tract runnable: {}", e))?;

        Ok(Self {
            model_name,
            dims: config.dims.unwrap_or(dims),
            tokenizer,
            runnable,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl Embedder for TractEmbedder {
    fn dim(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, RagError> {
        tokio::task::block_in_place(|| self.run_one(text)).map_err(|e| RagError::EmbeddingFailed(e.to_string()))
    }
}

impl TractEmbedder {
    fn run_one(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenize: {}", e))?;
        let ids = encoding.get_ids();
        let len = ids.len().min(DEFAULT_MAX_LEN);

        let mut input_ids = vec![0i64; len];
        let mut attention_mask = vec![0i64; len];
        for (j, &id) in ids.iter().take(len).enumerate() {
            input_ids[j] = id as i64;
            attention_mask[j] = 1;
        }

        let input_ids_tensor = ndarray::Array2::from_shape_vec((1, len), input_ids)
            .map_err(|e| anyhow::anyhow!("input ids shape: {}", e))?;
        let attention_mask_tensor = ndarray::Array2::from_shape_vec((1, len), attention_mask)
            .map_err(|e| anyhow::anyhow!("attention mask shape: {}", e))?;

        let input_ids_t: Tensor = input_ids_tensor.into();
        let attention_mask_t: Tensor = attention_mask_tensor.into();
        let result = self
            .runnable
            .run(tvec!(input_ids_t.into(), attention_mask_t.into()))?;

        let output = result
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no output tensor"))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| anyhow::anyhow!("output to array: {}", e))?;

        let shape = view.shape();
        let mut vec = if shape.len() == 2 {
            view.slice(ndarray::s![0, ..]).iter().copied().collect::<Vec<f32>>()
        } else if shape.len() == 3 {
            let seq_len = shape[1].min(len);
            let mut sum = vec![0f32; self.dims];
            for j in 0..seq_len {
                for (k, &v) in view.slice(ndarray::s![0, j, ..]).iter().enumerate() {
                    if k < self.dims {
                        sum[k] += v;
                    }
                }
            }
            if seq_len > 0 {
                for x in &mut sum {
                    *x /= seq_len as f32;
                }
            }
            sum
        } else {
            bail!("unexpected output shape: {:?}", shape);
        };

        normalize_l2(&mut vec);
        Ok(vec)
    }
}
