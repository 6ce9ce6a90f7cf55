mod cli;
mod server;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use strata::config::StrataConfig;
use strata::memory::types::{ContentType, Provenance};

#[derive(Parser)]
#[command(name = "strata", version, about = "Local-first memory substrate with tag-walk retrieval")]
struct Cli {
    /// Config file (default: ~/.strata/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio transport)
    Serve,
    /// Ingest a file, or every supported file under a directory
    Ingest {
        path: PathBuf,
        /// Force a content type (code, prose, transcript) instead of guessing from the extension
        #[arg(long = "type")]
        content_type: Option<ContentType>,
        /// sovereign, external or quarantine
        #[arg(long)]
        provenance: Option<Provenance>,
        /// Bucket to file every atom under (repeatable)
        #[arg(long = "bucket")]
        buckets: Vec<String>,
        /// Epoch label recorded on every atom
        #[arg(long)]
        epoch: Option<String>,
    },
    /// Retrieve context for a query
    Search {
        query: String,
        /// Character budget (default from config)
        #[arg(long)]
        budget: Option<usize>,
    },
    /// Discover tags and apply them to every atom
    Infect {
        /// Extra tag to add to the master list (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Re-apply the stored master list without discovery
        #[arg(long, conflicts_with = "tags")]
        replay: bool,
    },
    /// Export all data as JSON lines to stdout
    Export,
    /// Import a JSON-lines export
    Import { file: PathBuf },
    /// Show store statistics
    Stats {
        /// Restrict atom counts to one source path
        #[arg(long)]
        source: Option<String>,
    },
    /// Check database health
    Doctor,
    /// Delete all stored data
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = match cli.config {
        Some(ref path) => StrataConfig::load_from(path)?,
        None => StrataConfig::load()?,
    };

    // Log to stderr so stdout stays clean for MCP JSON-RPC and exports.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            server::serve_stdio(config).await?;
        }
        Command::Ingest {
            path,
            content_type,
            provenance,
            buckets,
            epoch,
        } => {
            let args = cli::ingest::IngestArgs {
                content_type,
                provenance,
                buckets,
                epoch,
            };
            cli::ingest::ingest(&config, &path, &args)?;
        }
        Command::Search { query, budget } => cli::search::search(&config, &query, budget)?,
        Command::Infect { tags, replay } => cli::infect::infect(&config, tags, replay).await?,
        Command::Export => cli::export::export(&config)?,
        Command::Import { file } => cli::import::import(&config, &file)?,
        Command::Stats { source } => cli::stats::stats(&config, source.as_deref())?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Reset => cli::reset::reset(&config)?,
    }

    Ok(())
}
