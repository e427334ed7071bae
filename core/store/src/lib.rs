pub mod config;
pub mod database;
pub mod error;
pub mod migration;
pub mod service;

pub use config::{default_db_path, default_embedder, StoreConfig, DB_PATH_ENV};
pub use database::{ConsistencyReport, MemoryStore, RebuildStats};
pub use error::{MemoryError, Result};
pub use migration::{MigrationStats, SCHEMA_VERSION};
pub use service::{router, AppState};
