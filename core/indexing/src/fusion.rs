// Reciprocal Rank Fusion (RRF)

use agent_memory_schemas::MemoryId;
use std::collections::HashMap;

/// RRF smoothing constant. Fixed: result scores are compared against it.
pub const RRF_K: f64 = 60.0;

/// Hits fetched from each index before fusion.
pub const K_CANDIDATES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedCandidate {
    pub id: MemoryId,
    pub fused_score: f64,
}

/// Fuse best-first rankings into one list.
///
/// An item at 0-based rank `r` contributes `1 / (r + RRF_K)`; contributions
/// are summed per id across rankings. The output is sorted by descending
/// score, ties keep the order in which ids were first seen.
pub fn reciprocal_rank_fusion(rankings: &[&[MemoryId]]) -> Vec<FusedCandidate> {
    let mut fused: Vec<FusedCandidate> = Vec::new();
    let mut positions: HashMap<MemoryId, usize> = HashMap::new();

    for ranking in rankings {
        for (rank, id) in ranking.iter().enumerate() {
            let contribution = 1.0 / (rank as f64 + RRF_K);
            match positions.get(id) {
                Some(&index) => fused[index].fused_score += contribution,
                None => {
                    positions.insert(*id, fused.len());
                    fused.push(FusedCandidate {
                        id: *id,
                        fused_score: contribution,
                    });
                }
            }
        }
    }

    fused.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));
    fused
}

/// Size of the working set that freshness is applied to.
pub fn candidate_limit(top_k: usize) -> usize {
    top_k.saturating_mul(2).max(10)
}
