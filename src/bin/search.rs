use anyhow::Result;
use clap::Parser;
use ragsync::{Config, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "search")]
#[command(about = "Retrieve the chunks most similar to a query")]
struct Args {
    /// Query text
    query: String,

    /// Number of results (defaults to [retrieval] default_k)
    #[arg(short, long)]
    k: Option<usize>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.storage.log_level.as_str()),
    )
    .init();

    let pipeline = Pipeline::from_config(&config).await?;
    let k = args.k.unwrap_or_else(|| pipeline.default_k());
    let start = std::time::Instant::now();
    let results = pipeline.retrieve_text(&args.query, k).await?;
    let elapsed = start.elapsed();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("\n=== {} results for {:?} ({:?}, {:?} mode) ===\n", results.len(), args.query, elapsed, config.retrieval.mode);
    if results.is_empty() {
        println!("No matching chunks. Has anything been ingested yet?");
        return Ok(());
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{:>2}. [{:.4}] {} #{} ({:?})",
            rank + 1,
            result.score,
            result.chunk.source_id,
            result.chunk.index,
            result.origin
        );
        println!("    {}", preview(&result.chunk.text, 160));
    }
    Ok(())
}
