use crate::freshness::freshness_multiplier;
use crate::fusion::K_CANDIDATES;
use agent_memory_schemas::{Memory, ScoredMemory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retrieval knobs. The RRF constant is deliberately not one of them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Hits fetched from each index
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,

    /// Vector neighbours at or below this cosine similarity are ignored
    #[serde(default)]
    pub min_similarity: f32,
}

fn default_candidate_pool() -> usize {
    K_CANDIDATES
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_pool: default_candidate_pool(),
            min_similarity: 0.0,
        }
    }
}

/// Apply freshness decay to fused candidates and keep the best `top_k`.
///
/// `candidates` must already be in fused order; the sort is stable so equal
/// final scores keep that order.
pub fn apply_freshness(
    candidates: Vec<(Memory, f64)>,
    top_k: usize,
    now: DateTime<Utc>,
) -> Vec<ScoredMemory> {
    let mut scored: Vec<ScoredMemory> = candidates
        .into_iter()
        .map(|(memory, fused_score)| {
            let multiplier = freshness_multiplier(&memory.last_verified_at, now);
            ScoredMemory {
                score: fused_score * multiplier,
                fused_score,
                memory,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}
