use anyhow::Result;
use clap::{Parser, Subcommand};
use ragsync::db::{migrate, Db};
use ragsync::remote::remote_from_config;
use ragsync::scheduler::Scheduler;
use ragsync::{Config, Pipeline};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "ragsync")]
#[command(about = "Incremental document ingestion with local/remote vector store sync")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the periodic ingestion and sync tasks until Ctrl-C
    Run,
    /// Check configuration, database schema and remote store reachability
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.storage.log_level.as_str()),
    )
    .init();

    match args.command.unwrap_or(Command::Verify) {
        Command::Run => run_daemon(&config).await,
        Command::Verify => run_verification(&config).await,
    }
}

async fn run_daemon(config: &Config) -> Result<()> {
    log::info!("Starting RAGSync v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Source folder: {}", config.source_folder().display());
    log::info!("Database path: {}", config.db_path().display());
    log::info!(
        "Remote sync: {}",
        if config.remote.enabled { config.remote.url.as_str() } else { "disabled" }
    );

    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let mut handle = Scheduler::from_config(Arc::clone(&pipeline), config).start();

    let interrupted = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            true
        }
        // A task only ends by itself on a fatal error
        result = handle.wait() => {
            result?;
            false
        }
    };
    if interrupted {
        log::info!("Shutdown requested");
        handle.shutdown().await?;
    }

    let stats = pipeline.get_stats().await?;
    log::info!(
        "Final state: {} chunks ({} pending, {} synced, {} failed)",
        stats.store.total_chunks,
        stats.store.pending,
        stats.store.synced,
        stats.store.failed
    );
    Ok(())
}

async fn run_verification(config: &Config) -> Result<()> {
    log::info!("Starting RAGSync v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Configuration loaded successfully");
    log::info!("Source folder: {}", config.source_folder().display());
    log::info!("Database path: {}", config.db_path().display());
    log::info!(
        "Embeddings: {} {} ({} dims)",
        config.embeddings.provider,
        config.embeddings.model,
        config.embeddings.dimensions
    );

    let db = Db::new(config.db_path());
    db.with_connection(migrate::run_migrations).await?;
    let applied = db.with_connection(|conn| migrate::get_applied_migrations(conn)).await?;
    log::info!("Applied migrations: {}", applied.join(", "));

    if let Some(remote) = remote_from_config(config)? {
        remote.ensure_ready(config.embeddings.dimensions).await?;
        log::info!("Remote store {} reachable, collection {}", remote.name(), config.remote.collection);
    }

    log::info!("Verification complete");
    Ok(())
}
