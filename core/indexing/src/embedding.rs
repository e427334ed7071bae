use thiserror::Error;

/// Dimension of every stored and query embedding (bge-small-en-v1.5 size).
pub const EMBEDDING_DIM: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Errors that can occur while turning text into a vector.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// Model weights could not be loaded
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    /// Forward pass failed
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    /// Model produced a vector of the wrong length
    #[error("Expected {expected}-dimensional embedding, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Text to dense vector.
///
/// Implementations are deterministic and keep no per-text cache. They are
/// loaded once per process and shared behind an `Arc<dyn Embedder>`.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn model_name(&self) -> &str;
}

/// Embed and reject vectors that do not have [`EMBEDDING_DIM`] components.
pub fn embed_checked(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let embedding = embedder.embed(text)?;
    if embedding.len() != EMBEDDING_DIM {
        return Err(EmbeddingError::DimensionMismatch {
            expected: EMBEDDING_DIM,
            actual: embedding.len(),
        });
    }
    Ok(embedding)
}

/// Feature-hashing embedder used when no local model is compiled in.
///
/// Each lowercase word token is hashed (FNV-1a) into one of the
/// [`EMBEDDING_DIM`] buckets and the resulting counts are L2-normalized.
/// Texts sharing no token have cosine similarity exactly zero.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut embedding = vec![0.0f32; EMBEDDING_DIM];

        for token in tokens(text) {
            let bucket = (fnv1a(token.as_bytes()) % EMBEDDING_DIM as u64) as usize;
            embedding[bucket] += 1.0;
        }

        normalize(&mut embedding);
        Ok(embedding)
    }

    fn model_name(&self) -> &str {
        "feature-hash-384"
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}
