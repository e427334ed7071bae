pub mod embedding;
pub mod freshness;
pub mod fusion;
pub mod keyword;
#[cfg(feature = "fastembed")]
pub mod local_model;
pub mod ranking;
pub mod vector;

pub use embedding::{embed_checked, Embedder, EmbeddingError, HashEmbedder, EMBEDDING_DIM};
pub use freshness::{freshness_multiplier, parse_timestamp};
pub use fusion::{candidate_limit, reciprocal_rank_fusion, FusedCandidate, K_CANDIDATES, RRF_K};
pub use keyword::match_expression;
#[cfg(feature = "fastembed")]
pub use local_model::FastEmbedder;
pub use ranking::{apply_freshness, RetrievalConfig};
pub use vector::{NearestNeighbors, VectorHit};
