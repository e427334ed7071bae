//! Local ONNX embedding model via fastembed.

use crate::embedding::{Embedder, EmbeddingError};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;
use tracing::info;

/// 384-dim model the stored vectors are built with.
pub const DEFAULT_MODEL: &str = "BAAI/bge-small-en-v1.5";

pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
}

impl FastEmbedder {
    /// Load the model. Downloads weights on first use; call once per process.
    pub fn new() -> Result<Self, EmbeddingError> {
        info!("Loading embedding model {}", DEFAULT_MODEL);

        let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::BGESmallENV15))
            .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;

        info!("Embedding model ready");
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let model = self
            .model
            .lock()
            .map_err(|_| EmbeddingError::InferenceFailed("model lock poisoned".into()))?;

        let mut batch = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::InferenceFailed(e.to_string()))?;

        batch
            .pop()
            .ok_or_else(|| EmbeddingError::InferenceFailed("model returned no embedding".into()))
    }

    fn model_name(&self) -> &str {
        DEFAULT_MODEL
    }
}
