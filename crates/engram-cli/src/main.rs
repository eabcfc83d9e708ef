use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use engram::config::Config;
use engram::storage::{MetadataStore, VectorStore};
use engram_cli::commands::{CompactCommand, PruneCommand, StatsCommand};
use engram_cli::error::CliResult;
use engram_cli::output::OutputFormat;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "engram-cli")]
#[command(about = "Engram CLI - Management tool for engram vector memory storage")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Show storage statistics for a namespace")]
    Stats(StatsCommand),

    #[clap(about = "Deduplicate a namespace's vectors")]
    Compact(CompactCommand),

    #[clap(about = "Remove expired items from a namespace")]
    Prune(PruneCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(data_dir) = cli.data_dir.clone() {
        config.storage.data_dir = data_dir;
    }

    let vectors = Arc::new(VectorStore::connect(&config.storage.data_dir).await?);
    let metadata = Arc::new(MetadataStore::connect(&config.storage.data_dir).await?);

    match &cli.command {
        Command::Stats(cmd) => cmd.execute(&vectors, &metadata, format).await,
        Command::Compact(cmd) => cmd.execute(&vectors, &metadata, &config, format).await,
        Command::Prune(cmd) => cmd.execute(&vectors, &metadata, &config, format).await,
    }
}
