use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use replay_ingest::config::IngestConfig;
use replay_ingest::downloader::DownloadPolicy;
use replay_ingest::logging::{self, DEFAULT_FILTER};
use replay_ingest::pipeline::{RunStatus, UpdatePipeline};
use replay_ingest::source_client::{PlayerTarget, SearchQuery, SourceClient};
use replay_ingest::staging::StagingArea;
use replay_ingest::store;

#[derive(Debug, Parser)]
#[command(name = "replay_ingest", version, about = "Pull replay metadata into the local SQLite store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search one player's recent replays and import the unseen matches.
    Update(UpdateArgs),
}

#[derive(Debug, Args)]
struct UpdateArgs {
    /// Platform identity, e.g. `steam:76561198000000000`.
    #[arg(long)]
    player_id: Option<String>,
    /// Exact display name; ignored when --player-id is given.
    #[arg(long)]
    player_name: Option<String>,
    /// Maximum number of replays to search.
    #[arg(long, default_value_t = 50)]
    count: usize,
    /// Only replays created after this RFC 3339 timestamp.
    #[arg(long)]
    after: String,
    /// Overrides REPLAY_INGEST_DB_PATH.
    #[arg(long)]
    db: Option<PathBuf>,
    /// Overrides REPLAY_INGEST_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init_tracing(DEFAULT_FILTER)?;

    let cli = Cli::parse();
    match cli.command {
        Command::Update(args) => run_update(args),
    }
}

fn run_update(args: UpdateArgs) -> Result<()> {
    let target = PlayerTarget::from_parts(args.player_id.as_deref(), args.player_name.as_deref())?;
    let query = SearchQuery::new(target, &args.after, args.count)?;

    let mut cfg = IngestConfig::from_env()?;
    if let Some(db) = args.db {
        cfg.db_path = db;
    }
    if let Some(dir) = args.data_dir {
        cfg.data_dir = dir;
    }

    let conn = store::open_db(&cfg.db_path)?;
    let staging = StagingArea::open(&cfg.data_dir)?;
    let source = SourceClient::new(&cfg, staging.clone())?;
    let mut pipeline = UpdatePipeline::new(conn, source, staging, DownloadPolicy::from_config(&cfg));
    let report = pipeline.run(&query).context("update run failed")?;

    println!("Update complete");
    println!("DB: {}", cfg.db_path.display());
    if report.status == RunStatus::NoCandidates {
        println!("No candidate replays found");
        return Ok(());
    }
    println!("Found: {}", report.found);
    println!(
        "Filtered: analyzed={} already_present={} new={}",
        report.filter.analyzed,
        report.filter.already_present,
        report.filter.new_count()
    );
    println!(
        "Downloaded: {} (already staged {}, failed {})",
        report.download.downloaded,
        report.download.already_staged,
        report.download.failures.len()
    );
    for failure in report.download.failures.iter().take(6) {
        println!("   - {}: {}", failure.replay_id, failure.reason);
    }
    println!(
        "Imported: {} duplicate={} failed={}",
        report.import.imported, report.import.duplicate, report.import.failed
    );
    for failure in report.import.failures.iter().take(6) {
        println!("   - {}: {}", failure.file, failure.reason);
    }
    Ok(())
}
