use anyhow::Result;
use clap::Parser;
use ragsync::{Config, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "sync")]
#[command(about = "Run one sync cycle against the remote vector store")]
struct Args {
    /// Move Failed records back to Pending before syncing
    #[arg(long)]
    reset_failed: bool,

    /// Restrict --reset-failed to one chunk fingerprint
    #[arg(long, requires = "reset_failed")]
    fingerprint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.storage.log_level.as_str()),
    )
    .init();

    if !config.remote.enabled {
        log::warn!("[remote] is disabled; pending records will only be counted");
    }

    let pipeline = Pipeline::from_config(&config).await?;
    if args.reset_failed {
        let reset = pipeline.reset_failed(args.fingerprint).await?;
        println!("Reset {} failed records to pending", reset);
    }

    let report = pipeline.sync_now().await?;
    println!("\n=== Sync {} ===\n", report.run_id);
    println!("Uploaded: {}", report.uploaded);
    println!("Failed:   {} ({} parked)", report.failed, report.exhausted);
    println!("Skipped:  {}", report.skipped);
    println!("Deleted:  {}", report.deleted);
    Ok(())
}
