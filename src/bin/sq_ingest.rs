//! sq-ingest: Load a JSON or JSONL file into a SQLite table
//!
//! The file's records are sampled to infer a flat schema, a `data` table
//! is created, and every record is inserted as a row. Nested objects
//! become `parent_child` columns.
//!
//! Usage:
//!   # Sniff the dialect and load into out.db
//!   sq-ingest events.jsonl --db out.db
//!
//!   # Force array dialect, sample fewer records, batch inserts
//!   sq-ingest dump.json --db out.db --array --sample-size 100 --batch-size 500
//!
//!   # Read settings from a JSON config file
//!   sq-ingest events.jsonl --db out.db --config ingest.json

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use sq_ingest::{ingest, CancelToken, Dialect, FileSource, IngestConfig, SqliteBackend};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sq-ingest")]
#[command(about = "Load JSON into a SQLite table with inferred column types", long_about = None)]
struct Args {
    /// Input file
    #[arg(value_name = "FILE")]
    input: String,

    /// SQLite database to write to (created if missing)
    #[arg(long)]
    db: String,

    /// Input is newline-delimited JSON (one object per line)
    #[arg(long, conflicts_with = "array")]
    ndjson: bool,

    /// Input is a single JSON array of objects
    #[arg(long)]
    array: bool,

    /// JSON file with ingest settings; flags below override it
    #[arg(long)]
    config: Option<String>,

    /// Number of records sampled before the table is created (default: 1024)
    #[arg(long)]
    sample_size: Option<usize>,

    /// Separator for nested column names (default: "_")
    #[arg(long)]
    separator: Option<String>,

    /// Rows per INSERT statement once the table exists (default: 1)
    #[arg(long)]
    batch_size: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
            serde_json::from_str::<IngestConfig>(&text).with_context(|| format!("Invalid config {}", path))?
        }
        None => IngestConfig::default(),
    };
    if let Some(n) = args.sample_size {
        config.sample_size = n;
    }
    if let Some(sep) = args.separator {
        config.separator = sep;
    }
    if let Some(n) = args.batch_size {
        config.batch_size = n;
    }

    let dialect = if args.ndjson {
        Some(Dialect::Lines)
    } else if args.array {
        Some(Dialect::Array)
    } else {
        None
    };

    let source = FileSource::new(&args.input);
    let mut backend = SqliteBackend::open(&args.db).with_context(|| format!("Failed to open database {}", args.db))?;

    let report = ingest(&source, dialect, &mut backend, &config, &CancelToken::new())
        .with_context(|| format!("Failed to ingest {}", args.input))?;

    eprintln!(
        "Loaded {} rows from {} ({}) into {}",
        report.rows_inserted, args.input, report.dialect, args.db
    );

    Ok(())
}
