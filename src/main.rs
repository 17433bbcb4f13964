use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scripture_rag::commands::{ask, health, index_corpus, inspect};
use scripture_rag::config::{Config, resolve_base_dir, run_interactive_config, show_config};
use scripture_rag::corpus::CorpusKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scripture-rag")]
#[command(about = "Grounded question answering over the Douay-Rheims Bible and the Catechism")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the vector database (default: ~/.scripture-rag)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Embed a corpus CSV into its collection
    Index {
        #[arg(long, value_enum)]
        corpus: CorpusKind,
        /// CSV file to load instead of the configured one
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Collection to write instead of the configured one
        #[arg(long)]
        collection: Option<String>,
    },
    /// Ask questions interactively; 'quit' or 'exit' ends the session
    Ask {
        #[arg(long, value_enum, default_value_t = CorpusKind::Bible)]
        corpus: CorpusKind,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Show collection size, sample entries and raw search results
    Inspect {
        #[arg(long, value_enum, default_value_t = CorpusKind::Bible)]
        corpus: CorpusKind,
        #[arg(long)]
        collection: Option<String>,
        /// Number of entries to sample or search results to show
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Run a nearest-neighbour search for this text
        #[arg(long)]
        query: Option<String>,
    },
    /// Check the Ollama server, models and vector database
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base_dir = resolve_base_dir(cli.base_dir).context("Could not determine base directory")?;

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&Config::load(&base_dir)?);
        } else {
            run_interactive_config(&base_dir)?;
        }
        return Ok(());
    }

    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Index {
            corpus,
            csv,
            collection,
        } => {
            index_corpus(&config, corpus, csv.as_deref(), collection.as_deref()).await?;
        }
        Commands::Ask { corpus, collection } => {
            ask(&config, corpus, collection.as_deref()).await?;
        }
        Commands::Inspect {
            corpus,
            collection,
            limit,
            query,
        } => {
            inspect(
                &config,
                corpus,
                collection.as_deref(),
                limit,
                query.as_deref(),
            )
            .await?;
        }
        Commands::Health => {
            health(&config).await?;
        }
    }

    Ok(())
}
