//! sq-infer: Print the table sq-ingest would create for a JSON file
//!
//! Nothing is written; the file is sniffed, sampled and the inferred table
//! definition is printed as JSON.
//!
//! Usage:
//!   sq-infer events.jsonl
//!   sq-infer dump.json --sample-size 50 --compact

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use sq_ingest::{infer_schema, FileSource, IngestConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sq-infer")]
#[command(about = "Infer the relational schema of a JSON file", long_about = None)]
struct Args {
    /// Input file
    #[arg(value_name = "FILE")]
    input: String,

    /// Number of records to sample (default: 1024)
    #[arg(long)]
    sample_size: Option<usize>,

    /// Separator for nested column names (default: "_")
    #[arg(long)]
    separator: Option<String>,

    /// Compact output (no pretty-printing)
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = IngestConfig::default();
    if let Some(n) = args.sample_size {
        config.sample_size = n;
    }
    if let Some(sep) = args.separator {
        config.separator = sep;
    }

    let source = FileSource::new(&args.input);
    let (dialect, schema) =
        infer_schema(&source, None, &config).with_context(|| format!("Failed to infer schema of {}", args.input))?;

    let out = json!({
        "dialect": dialect,
        "tables": schema.tables,
    });

    let output = if args.compact {
        serde_json::to_string(&out)?
    } else {
        serde_json::to_string_pretty(&out)?
    };

    println!("{}", output);

    Ok(())
}
