//! Mutatis - adaptive memory store command line.
//!
//! Each invocation opens the database, runs one command and prints its result
//! as JSON on stdout. Logs go to stderr.

use chrono::Utc;
use clap::{Parser, Subcommand};
use mutatis_core::{config::DEFAULT_EMBEDDING_DIMENSIONS, AdaptiveMemory, MemoryConfig, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mutatis")]
#[command(about = "Adaptive memory store with tier-weighted retrieval", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Database path
    #[arg(long, env = "MUTATIS_DB_PATH", default_value = "mutatis.db")]
    db: PathBuf,

    /// Embedding width
    #[arg(long, env = "MUTATIS_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    dimensions: usize,

    /// Schema evolutions allowed in this session
    #[arg(long, default_value_t = 3)]
    session_cap: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Remember a statement
    Add {
        /// Text to remember
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Retrieve facts related to a query
    Query {
        /// Query text
        #[arg(required = true)]
        text: Vec<String>,

        /// Maximum number of scan results
        #[arg(short, long, default_value_t = 5)]
        k: usize,
    },

    /// Show fact counts per tier and evolution totals
    Stats,

    /// Delete expired facts
    Purge,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let filter = EnvFilter::new(format!(
        "mutatis={},mutatis_core={}",
        level.as_str().to_lowercase(),
        level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = MemoryConfig::default()
        .with_dimensions(cli.dimensions)
        .with_session_cap(cli.session_cap);
    debug!(db = %cli.db.display(), "opening store");
    let mut memory = AdaptiveMemory::open(&cli.db, config)?;

    match cli.command {
        Commands::Add { text } => {
            let outcome = memory.add(&text.join(" "))?;
            print_json(&outcome)
        }
        Commands::Query { text, k } => {
            let result = memory.query(&text.join(" "), k)?;
            print_json(&result)
        }
        Commands::Stats => print_json(&memory.stats()?),
        Commands::Purge => {
            let purged = memory.purge_expired(Utc::now())?;
            print_json(&serde_json::json!({ "purged": purged }))
        }
    }
}
