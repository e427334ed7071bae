use agent_memory_store::{default_embedder, router, MemoryStore, StoreConfig};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agent-memory")]
#[command(about = "Hybrid keyword + vector memory store for coding agents")]
struct Args {
    /// Path to SQLite database file
    #[arg(long, short)]
    db_path: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "AGENT_MEMORY_ADDR", default_value = "127.0.0.1:21955")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Agent Memory Service v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = StoreConfig::resolve(args.db_path);
    info!("Database: {}", config.db_path.display());

    let embedder = default_embedder().context("Failed to load embedding model")?;
    let store = MemoryStore::open(&config, embedder).with_context(|| {
        format!(
            "Failed to open memory store at {} (run `migrate --rebuild` if the indexes are inconsistent)",
            config.db_path.display()
        )
    })?;
    let store = Arc::new(store);
    info!("Store holds {} memories", store.count()?);

    let app = router(Arc::clone(&store));

    info!("Starting HTTP server on http://{}", args.addr);
    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, closing database");
    drop(store);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
