//! Vector projection codec and exact nearest-neighbour scan.

use agent_memory_schemas::MemoryId;

/// A nearest-neighbour hit, best first by ascending `distance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub id: MemoryId,
    pub distance: f32,
}

/// Serialize an embedding as little-endian `f32`s for the BLOB column.
pub fn encode(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Inverse of [`encode`]. `None` when the blob does not hold exactly `dim` floats.
pub fn decode(blob: &[u8], dim: usize) -> Option<Vec<f32>> {
    if blob.len() != dim * 4 {
        return None;
    }

    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Calculate cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Accumulates the `limit` closest vectors to `query`.
///
/// Vectors whose cosine similarity does not exceed `min_similarity` are not
/// counted as hits at all. Ties on distance fall back to ascending id so the
/// result is deterministic.
pub struct NearestNeighbors<'q> {
    query: &'q [f32],
    limit: usize,
    min_similarity: f32,
    hits: Vec<VectorHit>,
}

impl<'q> NearestNeighbors<'q> {
    pub fn new(query: &'q [f32], limit: usize, min_similarity: f32) -> Self {
        Self {
            query,
            limit,
            min_similarity,
            hits: Vec::new(),
        }
    }

    pub fn push(&mut self, id: MemoryId, embedding: &[f32]) {
        let similarity = cosine_similarity(self.query, embedding);
        if similarity <= self.min_similarity {
            return;
        }

        self.hits.push(VectorHit {
            id,
            distance: l2_distance(self.query, embedding),
        });
    }

    pub fn finish(mut self) -> Vec<VectorHit> {
        self.hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.id.cmp(&b.id))
        });
        self.hits.truncate(self.limit);
        self.hits
    }
}
