use agent_memory_indexing::vector;
use agent_memory_indexing::{
    apply_freshness, candidate_limit, embed_checked, match_expression, parse_timestamp,
    reciprocal_rank_fusion, Embedder, NearestNeighbors, RetrievalConfig, VectorHit, EMBEDDING_DIM,
};
use agent_memory_schemas::{Memory, MemoryId, MemoryPatch, NewMemory, ScoredMemory};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{MemoryError, Result};
use crate::migration;

const MEMORY_COLUMNS: &str = "id, category, topic, content, created_at, last_verified_at";

/// Fixed-width RFC3339 in UTC, so string order matches time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

// ============================================================================
// Reports
// ============================================================================

/// Disagreements between the record table and its two index projections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub records: usize,
    pub missing_keyword: usize,
    pub orphan_keyword: usize,
    pub stale_keyword: usize,
    pub missing_vector: usize,
    pub orphan_vector: usize,
    pub malformed_vector: usize,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_keyword == 0
            && self.orphan_keyword == 0
            && self.stale_keyword == 0
            && self.missing_vector == 0
            && self.orphan_vector == 0
            && self.malformed_vector == 0
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} records; keyword index: {} missing, {} orphaned, {} stale; \
             vector index: {} missing, {} orphaned, {} malformed",
            self.records,
            self.missing_keyword,
            self.orphan_keyword,
            self.stale_keyword,
            self.missing_vector,
            self.orphan_vector,
            self.malformed_vector
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildStats {
    pub keyword_rows: usize,
    pub vectors_removed: usize,
    pub vectors_embedded: usize,
}

// ============================================================================
// Store
// ============================================================================

/// The memory store: one SQLite file holding the records, the FTS5 keyword
/// projection and the vector projection.
///
/// Every mutation touches all three inside one transaction. Embeddings are
/// computed before the connection lock is taken.
pub struct MemoryStore {
    // Readers take this lock too: a rusqlite Connection is not Sync, and one
    // connection keeps each query a single consistent snapshot.
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
    retrieval: RetrievalConfig,
}

impl MemoryStore {
    /// Open (creating if needed), migrate, and refuse to serve if the
    /// indexes disagree with the records.
    pub fn open(config: &StoreConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let store = Self::open_unchecked(config, embedder)?;

        let report = store.check_consistency()?;
        if !report.is_consistent() {
            return Err(MemoryError::IndexInconsistency(report.to_string()));
        }

        info!("Memory store opened at {}", config.db_path.display());
        Ok(store)
    }

    /// Open and migrate without the consistency check. For repair tooling.
    pub fn open_unchecked(config: &StoreConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.ensure_parent_dir()?;
        let conn = Connection::open(&config.db_path)?;
        Self::from_connection(conn, embedder, config.retrieval)
    }

    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, embedder, RetrievalConfig::default())
    }

    fn from_connection(
        mut conn: Connection,
        embedder: Arc<dyn Embedder>,
        retrieval: RetrievalConfig,
    ) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        migration::run(&mut conn, embedder.as_ref())?;

        info!("Database initialized (embedder: {})", embedder.model_name());
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            retrieval,
        })
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MemoryError::LockPoisoned)
    }

    // === MUTATIONS ===

    /// Persist a new memory and index it. Returns the assigned id.
    pub fn save(&self, memory: &NewMemory) -> Result<MemoryId> {
        require_text("category", &memory.category)?;
        require_text("topic", &memory.topic)?;
        require_text("content", &memory.content)?;

        let embedding = embed_checked(self.embedder.as_ref(), &memory.content)?;
        let now = timestamp_now();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO memories (category, topic, content, created_at, last_verified_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![memory.category, memory.topic, memory.content, now],
        )?;
        let id = MemoryId(tx.last_insert_rowid());

        insert_keywords(&tx, id, &memory.category, &memory.topic, &memory.content)?;
        upsert_vector(&tx, id, &embedding)?;
        tx.commit()?;

        debug!("Saved memory: {} (category: {})", id, memory.category);
        Ok(id)
    }

    /// Apply the supplied fields. An empty patch changes nothing, not even
    /// `last_verified_at`, but still fails on an unknown id.
    pub fn update(&self, id: MemoryId, patch: &MemoryPatch) -> Result<Memory> {
        for (field, value) in [
            ("category", &patch.category),
            ("topic", &patch.topic),
            ("content", &patch.content),
        ] {
            if let Some(value) = value {
                require_text(field, value)?;
            }
        }

        let embedding = match &patch.content {
            Some(content) => Some(embed_checked(self.embedder.as_ref(), content)?),
            None => None,
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current = fetch_memory(&tx, id)?.ok_or(MemoryError::NotFound(id))?;
        if patch.is_empty() {
            return Ok(current);
        }

        let updated = Memory {
            id,
            category: patch.category.clone().unwrap_or(current.category),
            topic: patch.topic.clone().unwrap_or(current.topic),
            content: patch.content.clone().unwrap_or(current.content),
            created_at: current.created_at,
            last_verified_at: current.last_verified_at,
        };

        tx.execute(
            "UPDATE memories SET category = ?1, topic = ?2, content = ?3 WHERE id = ?4",
            params![updated.category, updated.topic, updated.content, id.0],
        )?;

        if patch.touches_keywords() {
            remove_keywords(&tx, id)?;
            insert_keywords(&tx, id, &updated.category, &updated.topic, &updated.content)?;
        }
        if let Some(embedding) = embedding {
            upsert_vector(&tx, id, &embedding)?;
        }
        tx.commit()?;

        debug!(
            "Updated memory: {} (re-embedded: {})",
            id,
            patch.touches_embedding()
        );
        Ok(updated)
    }

    /// Remove a memory from the record table and both indexes.
    pub fn delete(&self, id: MemoryId) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if fetch_memory(&tx, id)?.is_none() {
            return Err(MemoryError::NotFound(id));
        }

        remove_keywords(&tx, id)?;
        let vectors = tx.execute("DELETE FROM memory_vectors WHERE id = ?1", params![id.0])?;
        if vectors != 1 {
            return Err(MemoryError::IndexInconsistency(format!(
                "memory {} has no vector entry",
                id
            )));
        }
        tx.execute("DELETE FROM memories WHERE id = ?1", params![id.0])?;
        tx.commit()?;

        debug!("Deleted memory: {}", id);
        Ok(())
    }

    /// Mark a memory as confirmed still accurate. `last_verified_at` never
    /// moves backwards, even if the clock does.
    pub fn verify(&self, id: MemoryId) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let previous: String = tx
            .query_row(
                "SELECT last_verified_at FROM memories WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(MemoryError::NotFound(id))?;

        let now = Utc::now();
        let verified_at = match parse_timestamp(&previous) {
            Some(prev) if prev > now => prev,
            _ => now,
        };

        tx.execute(
            "UPDATE memories SET last_verified_at = ?1 WHERE id = ?2",
            params![format_timestamp(verified_at), id.0],
        )?;
        tx.commit()?;

        debug!("Verified memory: {}", id);
        Ok(())
    }

    // === RETRIEVAL ===

    /// Hybrid search: keyword and vector candidates fused by RRF, then
    /// re-ranked by freshness. At most `top_k` results, best first.
    pub fn query(&self, text: &str, top_k: usize) -> Result<Vec<ScoredMemory>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = embed_checked(self.embedder.as_ref(), text)?;
        let expression = match_expression(text);
        let pool = self.retrieval.candidate_pool;

        let mut conn = self.lock()?;
        // One read transaction so both indexes and the records are seen at
        // the same point in time.
        let tx = conn.transaction()?;

        let keyword_ids = match &expression {
            Some(expression) => keyword_candidates(&tx, expression, pool)?,
            None => Vec::new(),
        };
        let vector_ids: Vec<MemoryId> = vector_candidates(
            &tx,
            &query_embedding,
            pool,
            self.retrieval.min_similarity,
        )?
        .into_iter()
        .map(|hit| hit.id)
        .collect();

        let mut fused = reciprocal_rank_fusion(&[&keyword_ids, &vector_ids]);
        fused.truncate(candidate_limit(top_k));

        let mut candidates = Vec::with_capacity(fused.len());
        for candidate in fused {
            let memory = fetch_memory(&tx, candidate.id)?.ok_or_else(|| {
                MemoryError::IndexInconsistency(format!(
                    "index entry {} has no record",
                    candidate.id
                ))
            })?;
            candidates.push((memory, candidate.fused_score));
        }
        tx.commit()?;
        drop(conn);

        let results = apply_freshness(candidates, top_k, Utc::now());
        debug!(
            "Query {:?}: {} keyword, {} vector candidates, {} results",
            text,
            keyword_ids.len(),
            vector_ids.len(),
            results.len()
        );
        Ok(results)
    }

    // === READ ACCESSORS ===

    pub fn get(&self, id: MemoryId) -> Result<Option<Memory>> {
        let conn = self.lock()?;
        fetch_memory(&conn, id)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Most recently created memories, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<Memory>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM memories ORDER BY created_at DESC, id DESC LIMIT ?1",
            MEMORY_COLUMNS
        ))?;

        let memories = stmt
            .query_map(params![limit as i64], row_to_memory)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(memories)
    }

    // === MAINTENANCE ===

    pub fn check_consistency(&self) -> Result<ConsistencyReport> {
        let conn = self.lock()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        let malformed: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_vectors WHERE length(embedding) != ?1",
            params![(EMBEDDING_DIM * 4) as i64],
            |row| row.get(0),
        )?;

        Ok(ConsistencyReport {
            records: count("SELECT COUNT(*) FROM memories")?,
            missing_keyword: count(
                "SELECT COUNT(*) FROM memories m
                 WHERE NOT EXISTS (SELECT 1 FROM memories_fts f WHERE f.rowid = m.id)",
            )?,
            orphan_keyword: count(
                "SELECT COUNT(*) FROM memories_fts f
                 WHERE NOT EXISTS (SELECT 1 FROM memories m WHERE m.id = f.rowid)",
            )?,
            stale_keyword: count(
                "SELECT COUNT(*) FROM memories m JOIN memories_fts f ON f.rowid = m.id
                 WHERE f.category IS NOT m.category
                    OR f.topic IS NOT m.topic
                    OR f.content IS NOT m.content",
            )?,
            missing_vector: count(
                "SELECT COUNT(*) FROM memories m
                 WHERE NOT EXISTS (SELECT 1 FROM memory_vectors v WHERE v.id = m.id)",
            )?,
            orphan_vector: count(
                "SELECT COUNT(*) FROM memory_vectors v
                 WHERE NOT EXISTS (SELECT 1 FROM memories m WHERE m.id = v.id)",
            )?,
            malformed_vector: malformed as usize,
        })
    }

    /// Rebuild both projections from the record table.
    ///
    /// The keyword index is always regenerated. Vectors are recomputed for
    /// records that lack a valid one, or for every record when
    /// `reembed_all` is set (e.g. after switching embedding model). Holds the
    /// store lock for the whole run.
    pub fn rebuild_indexes(&self, reembed_all: bool) -> Result<RebuildStats> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut stats = RebuildStats::default();

        tx.execute("DELETE FROM memories_fts", [])?;
        stats.keyword_rows = tx.execute(
            "INSERT INTO memories_fts (rowid, category, topic, content)
             SELECT id, category, topic, content FROM memories",
            [],
        )?;

        stats.vectors_removed = if reembed_all {
            tx.execute("DELETE FROM memory_vectors", [])?
        } else {
            tx.execute(
                "DELETE FROM memory_vectors
                 WHERE id NOT IN (SELECT id FROM memories) OR length(embedding) != ?1",
                params![(EMBEDDING_DIM * 4) as i64],
            )?
        };

        let pending: Vec<(MemoryId, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, content FROM memories
                 WHERE id NOT IN (SELECT id FROM memory_vectors) ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| Ok((MemoryId(row.get(0)?), row.get(1)?)))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        for (id, content) in &pending {
            let embedding = embed_checked(self.embedder.as_ref(), content)?;
            upsert_vector(&tx, *id, &embedding)?;
        }
        stats.vectors_embedded = pending.len();
        tx.commit()?;

        if stats.vectors_removed > 0 {
            warn!("Removed {} stale vectors", stats.vectors_removed);
        }
        info!("Indexes rebuilt: {:?}", stats);
        Ok(stats)
    }
}

// ============================================================================
// Row helpers, shared with migrations
// ============================================================================

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MemoryError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn row_to_memory(row: &Row) -> rusqlite::Result<Memory> {
    Ok(Memory {
        id: MemoryId(row.get(0)?),
        category: row.get(1)?,
        topic: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        last_verified_at: row.get(5)?,
    })
}

fn fetch_memory(conn: &Connection, id: MemoryId) -> Result<Option<Memory>> {
    let memory = conn
        .query_row(
            &format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS),
            params![id.0],
            row_to_memory,
        )
        .optional()?;
    Ok(memory)
}

pub(crate) fn insert_keywords(
    conn: &Connection,
    id: MemoryId,
    category: &str,
    topic: &str,
    content: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO memories_fts (rowid, category, topic, content) VALUES (?1, ?2, ?3, ?4)",
        params![id.0, category, topic, content],
    )?;
    Ok(())
}

fn remove_keywords(conn: &Connection, id: MemoryId) -> Result<()> {
    let removed = conn.execute("DELETE FROM memories_fts WHERE rowid = ?1", params![id.0])?;
    if removed != 1 {
        return Err(MemoryError::IndexInconsistency(format!(
            "memory {} has {} keyword entries",
            id, removed
        )));
    }
    Ok(())
}

pub(crate) fn upsert_vector(conn: &Connection, id: MemoryId, embedding: &[f32]) -> Result<()> {
    conn.execute(
        "INSERT INTO memory_vectors (id, embedding) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET embedding = excluded.embedding",
        params![id.0, vector::encode(embedding)],
    )?;
    Ok(())
}

/// Keyword hits, best bm25 rank first
fn keyword_candidates(conn: &Connection, expression: &str, limit: usize) -> Result<Vec<MemoryId>> {
    let mut stmt = conn.prepare(
        "SELECT rowid FROM memories_fts
         WHERE memories_fts MATCH ?1
         ORDER BY rank
         LIMIT ?2",
    )?;

    let ids = stmt
        .query_map(params![expression, limit as i64], |row| {
            Ok(MemoryId(row.get(0)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(ids)
}

/// Exact nearest neighbours by L2 distance
fn vector_candidates(
    conn: &Connection,
    query: &[f32],
    limit: usize,
    min_similarity: f32,
) -> Result<Vec<VectorHit>> {
    let mut stmt = conn.prepare("SELECT id, embedding FROM memory_vectors")?;
    let mut rows = stmt.query([])?;
    let mut neighbors = NearestNeighbors::new(query, limit, min_similarity);

    while let Some(row) = rows.next()? {
        let id = MemoryId(row.get(0)?);
        let blob: Vec<u8> = row.get(1)?;
        let embedding = vector::decode(&blob, EMBEDDING_DIM).ok_or_else(|| {
            MemoryError::IndexInconsistency(format!("vector for memory {} is malformed", id))
        })?;
        neighbors.push(id, &embedding);
    }

    Ok(neighbors.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_memory_indexing::{EmbeddingError, HashEmbedder};
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn test_store() -> MemoryStore {
        MemoryStore::open_in_memory(Arc::new(HashEmbedder::new())).unwrap()
    }

    fn ids(results: &[ScoredMemory]) -> Vec<i64> {
        results.iter().map(|r| r.memory.id.0).collect()
    }

    /// Index rows for `id`, straight from the projections.
    fn index_rows(store: &MemoryStore, id: MemoryId) -> (Option<(String, String, String)>, Option<Vec<u8>>) {
        let conn = store.lock().unwrap();
        let keywords = conn
            .query_row(
                "SELECT category, topic, content FROM memories_fts WHERE rowid = ?1",
                params![id.0],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .unwrap();
        let vector = conn
            .query_row(
                "SELECT embedding FROM memory_vectors WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()
            .unwrap();
        (keywords, vector)
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            if text.contains("poison") {
                return Err(EmbeddingError::InferenceFailed("model crashed".into()));
            }
            HashEmbedder::new().embed(text)
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_store_creation() {
        let temp = NamedTempFile::new().unwrap();
        let store =
            MemoryStore::open(&StoreConfig::new(temp.path()), Arc::new(HashEmbedder::new()))
                .unwrap();

        assert_eq!(store.count().unwrap(), 0);
        assert!(store.check_consistency().unwrap().is_consistent());
    }

    #[test]
    fn test_sky_scenario() {
        let store = test_store();

        let id = store
            .save(&NewMemory::new("test", "T", "The sky is blue"))
            .unwrap();
        assert_eq!(id, MemoryId(1));
        assert_eq!(ids(&store.query("blue", 1).unwrap()), vec![1]);

        store
            .update(id, &MemoryPatch::default().with_content("The sky is green"))
            .unwrap();
        assert!(!ids(&store.query("blue", 1).unwrap()).contains(&1));
        assert_eq!(ids(&store.query("green", 1).unwrap()), vec![1]);
    }

    #[test]
    fn test_save_then_query_exact_content() {
        let store = test_store();
        store
            .save(&NewMemory::new("project", "Stack", "The backend uses Rust and SQLite"))
            .unwrap();
        let id = store
            .save(&NewMemory::new("people", "Owner", "Alice owns the billing service"))
            .unwrap();

        let results = store.query("Alice owns the billing service", 3).unwrap();
        assert_eq!(results[0].memory.id, id);
        assert!(results[0].score > 0.0);
        assert!(results[0].score <= results[0].fused_score);
    }

    #[test]
    fn test_keyword_match_on_topic_and_category() {
        let store = test_store();
        let id = store
            .save(&NewMemory::new("deployment", "Kubernetes", "Rollouts happen on Fridays"))
            .unwrap();

        assert_eq!(ids(&store.query("kubernetes", 3).unwrap()), vec![id.0]);
        assert_eq!(ids(&store.query("deployment", 3).unwrap()), vec![id.0]);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let store = test_store();
        let first = store.save(&NewMemory::new("c", "t", "first")).unwrap();
        let second = store.save(&NewMemory::new("c", "t", "second")).unwrap();
        assert!(second > first);

        store.delete(second).unwrap();
        let third = store.save(&NewMemory::new("c", "t", "third")).unwrap();
        assert!(third > second);
    }

    #[test]
    fn test_save_rejects_blank_fields() {
        let store = test_store();

        let err = store.save(&NewMemory::new("c", "t", "   ")).unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
        let err = store.save(&NewMemory::new("", "t", "content")).unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));

        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_update_without_fields_changes_nothing() {
        let store = test_store();
        let id = store
            .save(&NewMemory::new("test", "T", "The sky is blue"))
            .unwrap();

        let before = store.get(id).unwrap().unwrap();
        let indexes_before = index_rows(&store, id);

        let returned = store.update(id, &MemoryPatch::default()).unwrap();

        assert_eq!(returned, before);
        assert_eq!(store.get(id).unwrap().unwrap(), before);
        assert_eq!(index_rows(&store, id), indexes_before);
    }

    #[test]
    fn test_update_unknown_id() {
        let store = test_store();
        let err = store
            .update(MemoryId(5), &MemoryPatch::default())
            .unwrap_err();
        assert!(err.is_not_found());

        let err = store
            .update(MemoryId(5), &MemoryPatch::default().with_topic("x"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_update_topic_keeps_vector() {
        let store = test_store();
        let id = store
            .save(&NewMemory::new("test", "Weather", "The sky is blue"))
            .unwrap();
        let (_, vector_before) = index_rows(&store, id);

        let updated = store
            .update(id, &MemoryPatch::default().with_topic("Astronomy"))
            .unwrap();
        assert_eq!(updated.topic, "Astronomy");
        assert_eq!(updated.content, "The sky is blue");

        let (keywords, vector_after) = index_rows(&store, id);
        assert_eq!(vector_after, vector_before);
        assert_eq!(keywords.unwrap().1, "Astronomy");
        assert_eq!(ids(&store.query("astronomy", 3).unwrap()), vec![id.0]);
        assert!(store.query("weather", 3).unwrap().is_empty());
    }

    #[test]
    fn test_update_rejects_blank_field() {
        let store = test_store();
        let id = store.save(&NewMemory::new("c", "t", "original")).unwrap();

        let err = store
            .update(id, &MemoryPatch::default().with_content(""))
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
        assert_eq!(store.get(id).unwrap().unwrap().content, "original");
    }

    #[test]
    fn test_update_does_not_touch_verification() {
        let store = test_store();
        let id = store.save(&NewMemory::new("c", "t", "original")).unwrap();
        let before = store.get(id).unwrap().unwrap();

        let after = store
            .update(id, &MemoryPatch::default().with_content("rewritten"))
            .unwrap();
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.last_verified_at, before.last_verified_at);
    }

    #[test]
    fn test_delete_removes_from_all_stores() {
        let store = test_store();
        let id = store
            .save(&NewMemory::new("test", "T", "The sky is blue"))
            .unwrap();

        store.delete(id).unwrap();

        assert!(store.get(id).unwrap().is_none());
        assert_eq!(index_rows(&store, id), (None, None));
        assert!(store.query("The sky is blue", 5).unwrap().is_empty());
        assert!(store.check_consistency().unwrap().is_consistent());
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let store = test_store();
        let err = store.delete(MemoryId(999)).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Memory with ID 999 not found");
    }

    #[test]
    fn test_verify_is_monotonic() {
        let store = test_store();
        let id = store.save(&NewMemory::new("c", "t", "fact")).unwrap();
        let saved = store.get(id).unwrap().unwrap().last_verified_at;

        store.verify(id).unwrap();
        let first = store.get(id).unwrap().unwrap().last_verified_at;
        store.verify(id).unwrap();
        let second = store.get(id).unwrap().unwrap().last_verified_at;

        assert!(first >= saved);
        assert!(second >= first);
    }

    #[test]
    fn test_verify_never_moves_backwards() {
        let store = test_store();
        let id = store.save(&NewMemory::new("c", "t", "fact")).unwrap();
        let future = format_timestamp(Utc::now() + Duration::days(30));
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "UPDATE memories SET last_verified_at = ?1 WHERE id = ?2",
                params![future, id.0],
            )
            .unwrap();
        }

        store.verify(id).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().last_verified_at, future);
    }

    #[test]
    fn test_verify_missing_is_not_found() {
        let store = test_store();
        assert!(store.verify(MemoryId(3)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_freshness_breaks_ties() {
        let store = test_store();
        let old = store
            .save(&NewMemory::new("config", "Project Config", "The project uses Django"))
            .unwrap();
        let new = store
            .save(&NewMemory::new("config", "Project Config", "The project uses Django"))
            .unwrap();

        {
            let conn = store.lock().unwrap();
            conn.execute(
                "UPDATE memories SET last_verified_at = ?1 WHERE id = ?2",
                params![format_timestamp(Utc::now() - Duration::days(365)), old.0],
            )
            .unwrap();
        }

        let results = store.query("Django", 2).unwrap();
        assert_eq!(ids(&results), vec![new.0, old.0]);
        assert!(results[0].score > results[1].score);

        // Verifying the stale record brings it back level
        store.verify(old).unwrap();
        let results = store.query("Django", 2).unwrap();
        assert!((results[0].score - results[0].fused_score).abs() < 1e-6);
        assert!((results[1].score - results[1].fused_score).abs() < 1e-6);
    }

    #[test]
    fn test_freshness_only_reorders_the_fused_working_set() {
        let store = test_store();
        let stale: Vec<MemoryId> = (0..10)
            .map(|i| {
                store
                    .save(&NewMemory::new("notes", format!("Stale {}", i), "alpha beta"))
                    .unwrap()
            })
            .collect();
        // Matches one query term and sits farther in vector space: 11th by fused score
        let fresh = store
            .save(&NewMemory::new("notes", "Fresh", "alpha gamma delta epsilon"))
            .unwrap();

        {
            let conn = store.lock().unwrap();
            let year_ago = format_timestamp(Utc::now() - Duration::days(365));
            for id in &stale {
                conn.execute(
                    "UPDATE memories SET last_verified_at = ?1 WHERE id = ?2",
                    params![year_ago, id.0],
                )
                .unwrap();
            }
        }

        // candidate_limit(3) = 10 keeps only the stale records
        let results = store.query("alpha beta", 3).unwrap();
        assert_eq!(results.len(), 3);
        assert!(!ids(&results).contains(&fresh.0));

        // candidate_limit(6) = 12 admits it, and freshness lifts it to the top
        let results = store.query("alpha beta", 6).unwrap();
        assert_eq!(results[0].memory.id, fresh);
        assert!(results[0].fused_score < results[1].fused_score);
    }

    #[test]
    fn test_query_edge_cases() {
        let store = test_store();
        store.save(&NewMemory::new("c", "t", "some content")).unwrap();

        assert!(store.query("content", 0).unwrap().is_empty());
        assert!(store.query("", 3).unwrap().is_empty());
        assert!(store.query("!!! ???", 3).unwrap().is_empty());
        // FTS5 operators are taken literally
        assert!(store.query("content AND (NEAR", 3).is_ok());
    }

    #[test]
    fn test_query_respects_top_k() {
        let store = test_store();
        for i in 0..6 {
            store
                .save(&NewMemory::new("notes", format!("Note {}", i), "shared release notes"))
                .unwrap();
        }

        assert_eq!(store.query("release notes", 4).unwrap().len(), 4);
        assert_eq!(store.query("release notes", 50).unwrap().len(), 6);
    }

    #[test]
    fn test_failed_embedding_leaves_no_trace() {
        let store = MemoryStore::open_in_memory(Arc::new(FailingEmbedder)).unwrap();
        let id = store.save(&NewMemory::new("c", "t", "healthy")).unwrap();

        let err = store.save(&NewMemory::new("c", "t", "poison pill")).unwrap_err();
        assert!(matches!(err, MemoryError::Embedding(_)));
        assert_eq!(store.count().unwrap(), 1);

        let err = store
            .update(id, &MemoryPatch::default().with_topic("new").with_content("poison"))
            .unwrap_err();
        assert!(matches!(err, MemoryError::Embedding(_)));
        let unchanged = store.get(id).unwrap().unwrap();
        assert_eq!(unchanged.topic, "t");
        assert_eq!(unchanged.content, "healthy");
        assert!(store.check_consistency().unwrap().is_consistent());
    }

    #[test]
    fn test_failed_index_write_rolls_back_record() {
        let store = test_store();
        {
            let conn = store.lock().unwrap();
            conn.execute_batch("DROP TABLE memories_fts").unwrap();
        }

        assert!(store.save(&NewMemory::new("c", "t", "orphan")).is_err());

        let conn = store.lock().unwrap();
        let records: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .unwrap();
        let vectors: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_vectors", [], |row| row.get(0))
            .unwrap();
        assert_eq!(records, 0);
        assert_eq!(vectors, 0);
    }

    #[test]
    fn test_recent_orders_newest_first() {
        let store = test_store();
        let a = store.save(&NewMemory::new("c", "t", "a")).unwrap();
        let b = store.save(&NewMemory::new("c", "t", "b")).unwrap();
        let c = store.save(&NewMemory::new("c", "t", "c")).unwrap();

        let recent: Vec<MemoryId> = store.recent(2).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(recent, vec![c, b]);
        assert_eq!(store.recent(10).unwrap().last().unwrap().id, a);
    }

    #[test]
    fn test_inconsistent_index_blocks_open_until_rebuild() {
        let temp = NamedTempFile::new().unwrap();
        let config = StoreConfig::new(temp.path());
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new());

        {
            let store = MemoryStore::open(&config, embedder.clone()).unwrap();
            let id = store.save(&NewMemory::new("c", "t", "indexed twice")).unwrap();
            store.save(&NewMemory::new("c", "t", "other")).unwrap();

            let conn = store.lock().unwrap();
            conn.execute("DELETE FROM memory_vectors WHERE id = ?1", params![id.0])
                .unwrap();
            conn.execute("DELETE FROM memories_fts WHERE rowid = ?1", params![id.0])
                .unwrap();
        }

        let err = MemoryStore::open(&config, embedder.clone()).err().unwrap();
        assert!(matches!(err, MemoryError::IndexInconsistency(_)));

        let store = MemoryStore::open_unchecked(&config, embedder.clone()).unwrap();
        let report = store.check_consistency().unwrap();
        assert_eq!(report.missing_vector, 1);
        assert_eq!(report.missing_keyword, 1);

        let stats = store.rebuild_indexes(false).unwrap();
        assert_eq!(stats.keyword_rows, 2);
        assert_eq!(stats.vectors_embedded, 1);
        drop(store);

        let store = MemoryStore::open(&config, embedder).unwrap();
        assert_eq!(ids(&store.query("indexed twice", 1).unwrap()), vec![1]);
    }

    #[test]
    fn test_reembed_all_rewrites_every_vector() {
        let store = test_store();
        store.save(&NewMemory::new("c", "t", "one")).unwrap();
        store.save(&NewMemory::new("c", "t", "two")).unwrap();

        let stats = store.rebuild_indexes(true).unwrap();
        assert_eq!(stats.vectors_removed, 2);
        assert_eq!(stats.vectors_embedded, 2);
        assert!(store.check_consistency().unwrap().is_consistent());
    }
}
