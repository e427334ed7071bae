use agent_memory_indexing::{Embedder, RetrievalConfig};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;

/// Directory created next to the project root for store files
pub const DB_DIR: &str = ".ctxhub";

pub const DB_FILE: &str = "memory.sqlite";

/// Overrides the database location when no `--db-path` is given
pub const DB_PATH_ENV: &str = "AGENT_MEMORY_DB_PATH";

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub retrieval: RetrievalConfig,
}

impl StoreConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            retrieval: RetrievalConfig::default(),
        }
    }

    /// Explicit path, then `AGENT_MEMORY_DB_PATH`, then `<project root>/.ctxhub/memory.sqlite`.
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        let db_path = explicit
            .or_else(|| std::env::var_os(DB_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(default_db_path);

        Self::new(db_path)
    }

    pub(crate) fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

pub fn default_db_path() -> PathBuf {
    project_root().join(DB_DIR).join(DB_FILE)
}

/// Git top-level directory, or the current directory outside a repository.
fn project_root() -> PathBuf {
    let git_root = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .stderr(Stdio::null())
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|root| root.trim().to_string())
        .filter(|root| !root.is_empty());

    match git_root {
        Some(root) => {
            debug!("Using git root {}", root);
            PathBuf::from(root)
        }
        None => std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf()),
    }
}

/// The process-wide embedder: the local model when compiled in, otherwise
/// the hashing embedder.
#[cfg(feature = "fastembed")]
pub fn default_embedder() -> Result<Arc<dyn Embedder>> {
    let embedder = agent_memory_indexing::FastEmbedder::new()?;
    info!("Embedding engine initialized ({})", embedder.model_name());
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "fastembed"))]
pub fn default_embedder() -> Result<Arc<dyn Embedder>> {
    let embedder = agent_memory_indexing::HashEmbedder::new();
    tracing::warn!("Built without the fastembed feature, semantic search uses token hashing");
    info!("Embedding engine initialized ({})", embedder.model_name());
    Ok(Arc::new(embedder))
}
