//! Versioned schema migrations, tracked in `PRAGMA user_version`.
//!
//! Each step runs in its own transaction together with the version bump, so
//! a failed step leaves the database at the previous version.

use agent_memory_indexing::{embed_checked, parse_timestamp, Embedder};
use agent_memory_schemas::MemoryId;
use rusqlite::{params, Connection, Transaction};
use tracing::{debug, info, warn};

use crate::database::{format_timestamp, insert_keywords, timestamp_now, upsert_vector};
use crate::error::{MemoryError, Result};

/// Highest schema version this build knows how to open.
pub const SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    description: &'static str,
    apply: fn(&Transaction<'_>, &dyn Embedder) -> Result<usize>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "memories table with keyword and vector projections",
        apply: create_core_schema,
    },
    Migration {
        version: 2,
        description: "import legacy docs table",
        apply: import_legacy_docs,
    },
];

/// Migration statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStats {
    pub from_version: i64,
    pub to_version: i64,
    pub legacy_imported: usize,
}

/// Bring `conn` up to [`SCHEMA_VERSION`]. A no-op on a current database.
pub fn run(conn: &mut Connection, embedder: &dyn Embedder) -> Result<MigrationStats> {
    let from_version = schema_version(conn)?;
    if from_version > SCHEMA_VERSION {
        return Err(MemoryError::UnsupportedSchema {
            found: from_version,
            supported: SCHEMA_VERSION,
        });
    }

    let mut stats = MigrationStats {
        from_version,
        to_version: from_version,
        legacy_imported: 0,
    };

    for migration in MIGRATIONS.iter().filter(|m| m.version > from_version) {
        info!(
            "Applying migration v{}: {}",
            migration.version, migration.description
        );

        let tx = conn.transaction()?;
        let affected = (migration.apply)(&tx, embedder)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;

        if migration.version == 2 {
            stats.legacy_imported = affected;
        }
        stats.to_version = migration.version;
    }

    if stats.to_version != stats.from_version {
        info!("Migration complete: {:?}", stats);
    }
    Ok(stats)
}

pub fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn create_core_schema(tx: &Transaction<'_>, _embedder: &dyn Embedder) -> Result<usize> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            topic TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_verified_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at DESC);

        -- Keyword projection, rowid = memories.id
        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
            category,
            topic,
            content
        );

        -- Vector projection, little-endian f32 blobs
        CREATE TABLE IF NOT EXISTS memory_vectors (
            id INTEGER PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (id) REFERENCES memories(id) ON DELETE CASCADE
        );",
    )?;

    Ok(0)
}

struct LegacyDoc {
    id: i64,
    category: Option<String>,
    topic: Option<String>,
    content: Option<String>,
    timestamp: Option<String>,
    last_verified: Option<String>,
}

/// Copy rows of a pre-existing `docs` table into `memories`, keeping their
/// ids, and index them. The legacy tables are left in place.
fn import_legacy_docs(tx: &Transaction<'_>, embedder: &dyn Embedder) -> Result<usize> {
    if !table_exists(tx, "docs")? {
        debug!("No legacy docs table found");
        return Ok(0);
    }

    let has_last_verified = has_column(tx, "docs", "last_verified")?;
    let has_timestamp = has_column(tx, "docs", "timestamp")?;
    let query = format!(
        "SELECT id, category, topic, content, {}, {} FROM docs ORDER BY id",
        if has_timestamp { "timestamp" } else { "NULL" },
        if has_last_verified { "last_verified" } else { "NULL" },
    );

    let docs = {
        let mut stmt = tx.prepare(&query)?;
        let rows = stmt.query_map([], |row| {
            Ok(LegacyDoc {
                id: row.get(0)?,
                category: row.get(1)?,
                topic: row.get(2)?,
                content: row.get(3)?,
                timestamp: row.get(4)?,
                last_verified: row.get(5)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };

    let now = timestamp_now();
    for doc in &docs {
        let id = MemoryId(doc.id);
        let category = doc.category.clone().unwrap_or_default();
        let topic = doc.topic.clone().unwrap_or_default();
        let content = doc.content.clone().unwrap_or_default();

        let created_at = doc
            .timestamp
            .as_deref()
            .map(normalize_legacy_timestamp)
            .unwrap_or_else(|| now.clone());
        let last_verified_at = doc
            .last_verified
            .as_deref()
            .map(normalize_legacy_timestamp)
            .unwrap_or_else(|| created_at.clone());

        let embedding = embed_checked(embedder, &content)?;

        tx.execute(
            "INSERT INTO memories (id, category, topic, content, created_at, last_verified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id.0, category, topic, content, created_at, last_verified_at],
        )?;
        insert_keywords(tx, id, &category, &topic, &content)?;
        upsert_vector(tx, id, &embedding)?;
    }

    info!("Imported {} legacy memories", docs.len());
    Ok(docs.len())
}

/// Rewrite parsable legacy timestamps in the store's format; keep anything
/// else verbatim so freshness treats it as neutral.
fn normalize_legacy_timestamp(raw: &str) -> String {
    match parse_timestamp(raw) {
        Some(parsed) => format_timestamp(parsed),
        None => {
            warn!("Keeping unparsable legacy timestamp {:?}", raw);
            raw.to_string()
        }
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Check if a column exists in a table
fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let query = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&query)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns.iter().any(|name| name == column))
}
