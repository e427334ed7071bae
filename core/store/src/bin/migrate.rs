/// Maintenance binary - migrates the schema, checks and rebuilds the indexes
///
/// Usage:
///   cargo run --bin migrate [--db-path <path>] [--rebuild] [--reembed]
///
/// Options:
///   --db-path: Path to SQLite database (defaults to <git root>/.ctxhub/memory.sqlite)
///   --rebuild: Regenerate the keyword index and fill in missing vectors
///   --reembed: Recompute every vector (after changing embedding model)

use agent_memory_store::{default_embedder, MemoryStore, StoreConfig};
use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "migrate")]
#[command(about = "Migrate the memory database and repair its indexes")]
struct Args {
    /// Path to SQLite database file
    #[arg(long, short)]
    db_path: Option<PathBuf>,

    /// Rebuild the keyword index and missing vectors from the records
    #[arg(long)]
    rebuild: bool,

    /// Recompute every stored vector
    #[arg(long)]
    reembed: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Agent Memory - Migration Tool v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = StoreConfig::resolve(args.db_path);
    info!("Database: {}", config.db_path.display());

    // Opening applies any pending schema migrations
    let store = MemoryStore::open_unchecked(&config, default_embedder()?)?;
    info!("Found {} memories", store.count()?);

    let report = store.check_consistency()?;
    info!("Index check: {}", report);

    if args.rebuild || args.reembed {
        let stats = store.rebuild_indexes(args.reembed)?;
        info!(
            "Rebuilt {} keyword rows, embedded {} vectors",
            stats.keyword_rows, stats.vectors_embedded
        );

        let report = store.check_consistency()?;
        if !report.is_consistent() {
            bail!("Indexes still inconsistent after rebuild: {}", report);
        }
        info!("Indexes consistent");
    } else if !report.is_consistent() {
        warn!("Indexes are inconsistent, re-run with --rebuild");
        bail!("Index check failed: {}", report);
    }

    Ok(())
}
