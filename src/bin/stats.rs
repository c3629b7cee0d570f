use anyhow::Result;
use ragsync::{Config, Pipeline};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.storage.log_level.as_str()),
    )
    .init();

    let pipeline = Pipeline::from_config(&config).await?;
    let stats = pipeline.get_stats().await?;

    println!("\n=== RAGSync Store Statistics ===\n");
    println!("{:-<40}", "");
    println!("{:<24} {:>12}", "Source files", stats.store.sources);
    println!("{:<24} {:>12}", "  failed extraction", stats.store.sources_failed);
    println!("{:<24} {:>12}", "Files in cursor", stats.known_files);
    println!("{:-<40}", "");
    println!("{:<24} {:>12}", "Chunks", stats.store.total_chunks);
    println!("{:<24} {:>12}", "  pending", stats.store.pending);
    println!("{:<24} {:>12}", "  synced", stats.store.synced);
    println!("{:<24} {:>12}", "  failed", stats.store.failed);
    println!("{:<24} {:>12}", "  quarantined", stats.store.quarantined);
    println!("{:<24} {:>12}", "Tombstones", stats.store.tombstones);
    println!("{:-<40}", "");
    println!(
        "{:<24} {:>12}",
        "Remote sync",
        if stats.remote_enabled { "enabled" } else { "disabled" }
    );

    if stats.store.failed > 0 {
        println!("\n{} records exhausted their retries; run `sync --reset-failed` to retry them.", stats.store.failed);
    }
    Ok(())
}
