//! StrataKV CLI
//!
//! Command-line interface operating directly on a data directory.

use std::process;

use clap::{Parser, Subcommand};
use stratakv::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// StrataKV CLI
#[derive(Parser, Debug)]
#[command(name = "stratakv-cli")]
#[command(about = "CLI for the StrataKV embedded key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./stratakv_data")]
    data_dir: String,

    /// MemTable size limit in KB before flush
    #[arg(short = 'm', long, default_value = "4096")]
    memtable_kb: usize,

    /// Disable bloom filters on new runs
    #[arg(long)]
    no_bloom: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List live entries in [from, to)
    Scan {
        /// Inclusive lower bound
        #[arg(long)]
        from: Option<String>,

        /// Exclusive upper bound
        #[arg(long)]
        to: Option<String>,
    },

    /// Flush the memtable to a new run
    Flush,

    /// Merge all runs into one
    Compact,

    /// Show run statistics
    Stats,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stratakv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> stratakv::Result<()> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_size_limit(args.memtable_kb * 1024)
        .bloom_false_positive_rate(if args.no_bloom { None } else { Some(0.01) })
        .build();

    let engine = Engine::open(config)?;

    match args.command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { from, to } => {
            let iter = engine.range(
                from.as_deref().map(str::as_bytes),
                to.as_deref().map(str::as_bytes),
            )?;
            for item in iter {
                let (key, value) = item?;
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Commands::Flush => {
            engine.flush()?;
            println!("OK");
        }
        Commands::Compact => {
            let outcome = engine.compact()?;
            println!(
                "merged {} runs into {}",
                outcome.inputs.len(),
                outcome
                    .output
                    .map(|run| run.path.display().to_string())
                    .unwrap_or_else(|| "nothing (all keys deleted)".to_string())
            );
        }
        Commands::Stats => {
            for run in engine.runs().iter() {
                println!(
                    "run {:06}\tentries={}\tbytes={}\tbloom={}",
                    run.id(),
                    run.entry_count(),
                    run.file_size(),
                    run.has_filter()
                );
            }
            println!("runs: {}", engine.run_count());
        }
    }

    // Writes are only durable after the memtable is flushed
    engine.close()
}
