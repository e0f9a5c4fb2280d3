//! json2sql: Normalize a JSON document into SQL Server tables
//!
//! Usage:
//!   # Print the SQL script for a file
//!   json2sql data.json --root-name users --schema staging
//!
//!   # Read from stdin, print the normalized tables
//!   echo '{"id": 1, "posts": [{"id": 10}]}' | json2sql --tables
//!
//!   # Write one .jsonl file per table
//!   json2sql data.json --output-dir ./tables
//!
//!   # Check the script replays cleanly
//!   json2sql data.json --verify

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use json2sql::melt::{ArrayNaming, SingleWriter, TableWriter};
use json2sql::sql::MemoryStore;
use json2sql::{convert, normalize, parse_json_bytes, Conversion, ConvertConfig, Target};
use std::fs::File;
use std::io::{BufReader, Read, Write};

#[derive(Parser, Debug)]
#[command(name = "json2sql")]
#[command(about = "Normalize JSON into relational tables and SQL Server scripts", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Print the normalized tables as JSON instead of SQL
    #[arg(long, conflicts_with_all = ["output_dir", "jsonl"])]
    tables: bool,

    /// Output directory for separate .jsonl files per table
    #[arg(long, short = 'o', conflicts_with = "jsonl")]
    output_dir: Option<String>,

    /// Write all rows to stdout as JSON Lines tagged with `_table`
    #[arg(long)]
    jsonl: bool,

    /// Name of the root table (default: "rootTable")
    #[arg(long)]
    root_name: Option<String>,

    /// Target schema (default: "dbo")
    #[arg(long)]
    schema: Option<String>,

    /// Name array tables `{parent}_{field}` instead of `{field}`
    #[arg(long)]
    prefixed_arrays: bool,

    /// Comma-separated fields to never extract as entities
    #[arg(long)]
    scalar_fields: Option<String>,

    /// Fail on nested arrays instead of skipping them
    #[arg(long)]
    strict: bool,

    /// Type columns from the first value seen instead of all rows
    #[arg(long)]
    no_preflight: bool,

    /// Schema adjustments allowed per row (default: 10)
    #[arg(long)]
    max_retries: Option<usize>,

    /// Replay the script into an in-memory store and report row counts
    #[arg(long)]
    verify: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    // Build config
    let mut config = ConvertConfig::new(
        args.root_name.as_deref().unwrap_or("rootTable"),
        args.schema.as_deref().unwrap_or("dbo"),
    );
    if args.prefixed_arrays {
        config.melt.array_naming = ArrayNaming::Prefixed;
    }
    if let Some(fields_str) = &args.scalar_fields {
        config.melt.scalar_fields = fields_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    config.melt.strict = args.strict;
    config.persist.preflight = !args.no_preflight;
    if let Some(retries) = args.max_retries {
        config.persist.max_retries = retries;
    }

    let mut content = read_input(args.input.as_deref())?;
    let value = parse_json_bytes(&mut content).context("Failed to parse JSON")?;

    if args.tables || args.jsonl || args.output_dir.is_some() {
        let normalized = normalize(value, &config.melt).context("Failed to normalize document")?;

        if let Some(output_dir) = &args.output_dir {
            let mut writer = TableWriter::new_file_writer(output_dir)?;
            writer.write_tables(&normalized)?;
            writer.flush()?;
        } else if args.jsonl {
            let stdout = std::io::stdout();
            let mut writer = SingleWriter::new(stdout.lock());
            writer.write_tables(&normalized)?;
            writer.flush()?;
        } else {
            let json = serde_json::to_string_pretty(&normalized).context("Failed to serialize tables")?;
            println!("{}", json);
        }
        return Ok(());
    }

    let conversion = convert(value, &config, Target::Script).context("Failed to convert document")?;
    let Conversion::Script { tables, script } = conversion else {
        anyhow::bail!("Expected a script conversion");
    };

    if args.verify {
        let mut store = MemoryStore::new();
        script
            .replay(&mut store)
            .context("Script failed to replay into an empty store")?;

        let mut stderr = std::io::stderr().lock();
        for table in &tables.tables {
            let stored = store
                .table(&config.persist.schema, &table.name)
                .map_or(0, |t| t.row_count());
            writeln!(stderr, "{}: {} rows", table.name, stored)?;
        }
        for junction in &tables.junctions {
            let stored = store
                .table(&config.persist.schema, &junction.name)
                .map_or(0, |t| t.row_count());
            writeln!(stderr, "{}: {} links", junction.name, stored)?;
        }
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", script.text)?;
    out.flush()?;
    Ok(())
}

fn read_input(input: Option<&str>) -> Result<Vec<u8>> {
    let mut content = Vec::new();
    match input {
        Some(path) => {
            let mut reader = BufReader::new(File::open(path).with_context(|| format!("Failed to open {}", path))?);
            reader.read_to_end(&mut content).context("Failed to read input file")?;
        }
        None => {
            std::io::stdin()
                .read_to_end(&mut content)
                .context("Failed to read stdin")?;
        }
    }
    Ok(content)
}
