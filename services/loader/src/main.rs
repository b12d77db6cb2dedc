//! Loader Service - Full-refresh load of the Dubai population extracts
//!
//! Usage:
//!   # Load everything from the data directory:
//!   cargo run --bin loader -- --data-dir ./data
//!
//!   # Check the files without touching the database:
//!   cargo run --bin loader -- --data-dir ./data --dry-run
//!
//!   # Print what the database currently holds:
//!   cargo run --bin loader -- --verify
//!
//! Exits 0 when every stage through verification completed, 1 otherwise.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use db::{DbConfig, RetryPolicy};
use loader::phases::DEFAULT_BATCH_SIZE;
use loader::{verify, MemoryStore, PgStore, Pipeline, PipelineConfig, PipelineSummary, Store};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Loads Dubai population CSV extracts into PostgreSQL")]
struct Args {
    /// Directory holding sectors.csv, communities.csv and population.csv
    #[arg(long, env = "DATA_DIR", default_value = "/app/data")]
    data_dir: PathBuf,

    /// Population rows per insert batch
    #[arg(long, env = "LOAD_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Dry run - load into an in-memory store, don't touch the database
    #[arg(long, default_value = "false", conflicts_with = "verify")]
    dry_run: bool,

    /// Verify mode - print the counts of the current database and exit
    #[arg(long, default_value = "false")]
    verify: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("loader=info,db=info,sqlx=warn"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn write_summary(out: &mut impl Write, summary: &PipelineSummary) -> Result<()> {
    writeln!(out, "\n=== Load Summary ===")?;
    writeln!(
        out,
        "{}",
        serde_json::to_string_pretty(summary).context("Failed to render summary")?
    )?;
    Ok(())
}

/// Run the pipeline and write its summary to `out`. A failed run still
/// writes what the completed stages produced before the error propagates.
async fn run_pipeline(
    store: &dyn Store,
    config: PipelineConfig,
    out: &mut impl Write,
) -> Result<PipelineSummary> {
    let mut pipeline = Pipeline::new(store, config);
    let result = pipeline.run().await;
    write_summary(out, pipeline.summary())?;
    Ok(result?)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    println!("=== Dubai Population Loader ===");
    println!("Data directory: {}", args.data_dir.display());
    println!(
        "Mode: {}",
        if args.dry_run {
            "dry-run"
        } else if args.verify {
            "verify"
        } else {
            "live"
        }
    );

    let mut config = PipelineConfig::new(&args.data_dir);
    config.batch_size = args.batch_size;

    if args.dry_run {
        let store = MemoryStore::new();
        run_pipeline(&store, config, &mut std::io::stdout()).await?;
        println!("\nDry run - nothing written to the database");
        return Ok(());
    }

    let db_config = DbConfig::from_env(5);
    let pool = db::connect(&db_config, &RetryPolicy::from_env()).await?;
    let store = PgStore::new(pool);

    if args.verify {
        let report = verify::verify(&store).await?;
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to render report")?
        );
        return Ok(());
    }

    run_pipeline(&store, config, &mut std::io::stdout()).await?;

    println!("\n=== Data Loading Complete ===");
    Ok(())
}
