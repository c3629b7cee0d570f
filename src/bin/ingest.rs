use anyhow::Result;
use clap::Parser;
use ragsync::{Config, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Scan the source folder once and ingest new, modified and removed files")]
struct Args {
    /// Run one sync cycle after ingesting
    #[arg(short, long)]
    sync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.storage.log_level.as_str()),
    )
    .init();

    log::info!("Starting RAGSync ingestion");
    log::info!("Source folder: {}", config.source_folder().display());
    log::info!("Database path: {}", config.db_path().display());

    let pipeline = Pipeline::from_config(&config).await?;
    let report = pipeline.ingest_now().await?;

    println!("\n=== Ingestion {} ===\n", report.run_id);
    println!("Files added:     {}", report.files_added);
    println!("Files modified:  {}", report.files_modified);
    println!("Files removed:   {}", report.files_removed);
    println!("Files failed:    {}", report.files_failed);
    println!("Files deferred:  {}", report.files_deferred);
    println!("Chunks stored:   {}", report.chunks_stored);
    println!("Chunks unchanged: {}", report.chunks_unchanged);
    println!("Chunks failed:   {}", report.chunks_failed);
    println!("Chunks retired:  {}", report.chunks_retired);

    if args.sync {
        let sync = pipeline.sync_now().await?;
        println!("\n=== Sync {} ===\n", sync.run_id);
        println!("Uploaded: {}", sync.uploaded);
        println!("Failed:   {} ({} parked)", sync.failed, sync.exhausted);
        println!("Skipped:  {}", sync.skipped);
        println!("Deleted:  {}", sync.deleted);
    }

    Ok(())
}
