//! Error types for the memory store.

use agent_memory_indexing::EmbeddingError;
use agent_memory_schemas::MemoryId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// The referenced id does not exist
    #[error("Memory with ID {0} not found")]
    NotFound(MemoryId),
    /// Input rejected before any write began
    #[error("Invalid input: {0}")]
    Validation(String),
    /// Record table and index projections disagree; run a rebuild
    #[error("Index inconsistency: {0}")]
    IndexInconsistency(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error("Database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i64, supported: i64 },
    #[error("Store lock poisoned")]
    LockPoisoned,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MemoryError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
