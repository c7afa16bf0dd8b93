use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use replay_ingest::config;
use replay_ingest::importer::MatchImporter;
use replay_ingest::logging::{self, DEFAULT_FILTER};
use replay_ingest::rank_catalog;
use replay_ingest::store;

/// Imports a directory of full replay documents. The directory is left as is.
#[derive(Debug, Parser)]
#[command(name = "bulk_import", version)]
struct Cli {
    /// Directory holding one `<id>.json` per replay.
    #[arg(long)]
    dir: PathBuf,
    /// SQLite path; defaults to REPLAY_INGEST_DB_PATH or data/rocket_league.db.
    #[arg(long)]
    db: Option<PathBuf>,
    /// Skip pre-seeding the rank catalog from the files.
    #[arg(long)]
    no_seed_ranks: bool,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init_tracing(DEFAULT_FILTER)?;

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(config::db_path_from_env);

    let files = replay_files(&cli.dir)?;
    if files.is_empty() {
        return Err(anyhow!("no replay json files in {}", cli.dir.display()));
    }

    let mut conn = store::open_db(&db_path)?;
    let seeded = if cli.no_seed_ranks {
        0
    } else {
        let ranks = rank_catalog::collect_ranks_from_files(&files);
        rank_catalog::seed_ranks(&mut conn, &ranks)?
    };

    let mut importer = MatchImporter::new();
    let counters = importer.import_files(&mut conn, &files);

    println!("Bulk import complete");
    println!("DB: {}", db_path.display());
    println!("Files: {}", files.len());
    println!("Ranks seeded: {seeded}");
    println!(
        "Imported: {} duplicate={} failed={}",
        counters.imported, counters.duplicate, counters.failed
    );
    if !counters.failures.is_empty() {
        println!("  errors: {}", counters.failures.len());
        for failure in counters.failures.iter().take(6) {
            println!("   - {}: {}", failure.file, failure.reason);
        }
    }
    Ok(())
}

fn replay_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry.context("read dir entry")?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
