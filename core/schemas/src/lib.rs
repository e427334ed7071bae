use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ID Types
// ============================================================================

/// Row id of a memory. Assigned by the store, strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub i64);

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Memory Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub category: String,
    pub topic: String,
    pub content: String,
    pub created_at: String,       // RFC3339, immutable
    pub last_verified_at: String, // RFC3339, bumped by verify
}

/// Fields supplied to `save`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMemory {
    pub category: String,
    pub topic: String,
    pub content: String,
}

impl NewMemory {
    pub fn new(
        category: impl Into<String>,
        topic: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            topic: topic.into(),
            content: content.into(),
        }
    }
}

/// Partial update. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl MemoryPatch {
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// True when no field was supplied.
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.topic.is_none() && self.content.is_none()
    }

    /// True when the keyword projection has to be rewritten.
    pub fn touches_keywords(&self) -> bool {
        !self.is_empty()
    }

    /// True when the embedding has to be recomputed.
    pub fn touches_embedding(&self) -> bool {
        self.content.is_some()
    }
}

// ============================================================================
// Retrieval Results
// ============================================================================

/// A query hit. `score` is the freshness-adjusted score used for ordering,
/// `fused_score` the raw reciprocal-rank-fusion score before decay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub memory: Memory,
    pub score: f64,
    pub fused_score: f64,
}
