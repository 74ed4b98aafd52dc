use clap::{Parser, Subcommand};
use notes_index::Result;
use notes_index::commands::{
    check, load_config, prune, reindex, resolve_config_dir, search, show_stats, watch,
};
use notes_index::config::{Config, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "notes-index")]
#[command(about = "Semantic search over a directory of markdown notes")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml (defaults to ~/.notes-index)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the notes directory, Ollama connection and indexing settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Scan the notes directory once and index every change
    Reindex,
    /// Search the indexed notes
    Search {
        /// Free-text query
        query: String,
        /// Number of results to return
        #[arg(long, short = 'k', default_value_t = 5)]
        top_k: usize,
        /// Show the contextualized text that was embedded instead of the raw chunk
        #[arg(long)]
        contextualized: bool,
    },
    /// Show index statistics and recent activity
    Stats,
    /// Keep the index up to date until interrupted
    Watch,
    /// Validate the index against its vector table
    Check {
        /// Repair inconsistencies and re-index affected files
        #[arg(long)]
        fix: bool,
    },
    /// Drop vector tables of other models or embedding versions
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = resolve_config_dir(cli.config_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&Config::load(&config_dir)?)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Reindex => {
            reindex(&load_config(&config_dir)?).await?;
        }
        Commands::Search {
            query,
            top_k,
            contextualized,
        } => {
            search(&load_config(&config_dir)?, &query, top_k, contextualized).await?;
        }
        Commands::Stats => {
            show_stats(&load_config(&config_dir)?).await?;
        }
        Commands::Watch => {
            watch(&load_config(&config_dir)?).await?;
        }
        Commands::Check { fix } => {
            check(&load_config(&config_dir)?, fix).await?;
        }
        Commands::Prune => {
            prune(&load_config(&config_dir)?).await?;
        }
    }

    Ok(())
}
