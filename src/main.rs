//! CLI entry point for the vector store.
//!
//! Every command prints JSON on stdout; logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{
    Parser, Subcommand, ValueEnum,
    builder::styling::{AnsiColor, Effects, Styles},
};
use ragstore::service::DEFAULT_CHUNK_CHARS;
use ragstore::{Metadata, RagError, RagStore, SearchOptions, Settings, VectorId, parse_filter};
use serde::Serialize;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Local vector store for retrieval-augmented generation
#[derive(Parser)]
#[command(
    name = "ragstore",
    version = env!("CARGO_PKG_VERSION"),
    about = "Local vector store with similarity search and clustering",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ClusterMethod {
    Kmeans,
    Hierarchical,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Set up .ragstore directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Embed and store a single text
    Add {
        text: String,

        /// Originating document or URL
        #[arg(long)]
        source: Option<String>,

        /// Extra metadata as key=value (repeatable)
        #[arg(short, long = "meta")]
        meta: Vec<String>,
    },

    /// Chunk a text file and store every chunk
    Ingest {
        path: PathBuf,

        /// Maximum characters per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_CHARS)]
        chunk_size: usize,
    },

    /// Search stored texts
    Search {
        query: String,

        /// Number of results (defaults to search.default_top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Exact metadata filter as key=value (repeatable)
        #[arg(short, long = "filter")]
        filter: Vec<String>,

        /// Rank by vector similarity only
        #[arg(long)]
        no_rerank: bool,
    },

    /// Show a stored record
    Get { id: String },

    /// Delete a stored record
    Delete { id: String },

    /// Show store statistics
    Stats,

    /// Group stored records
    Cluster {
        #[arg(value_enum, default_value = "kmeans")]
        method: ClusterMethod,

        /// Number of clusters for k-means
        #[arg(short, long, default_value_t = 3)]
        k: usize,

        /// Merge threshold for hierarchical clustering
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Exact metadata filter as key=value (repeatable)
        #[arg(short, long = "filter")]
        filter: Vec<String>,
    },

    /// Display active settings
    Config,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Configuration error loading from {}", path.display()))?,
        None => Settings::load().context("Configuration error")?,
    };
    settings.debug |= cli.debug;
    Ok(settings)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        if let Some(rag) = e.downcast_ref::<RagError>() {
            eprintln!("Code: {}", rag.status_code());
            for suggestion in rag.recovery_suggestions() {
                eprintln!("  - {suggestion}");
            }
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { force } = &cli.command {
        let cwd = std::env::current_dir()?;
        let path = Settings::init_config_file(&cwd, *force)?;
        return print_json(&serde_json::json!({ "created": path }));
    }

    let settings = load_settings(&cli)?;
    ragstore::logging::init(settings.debug);

    if let Commands::Config = &cli.command {
        return print_json(&settings);
    }

    let default_top_k = settings.search.default_top_k;
    let rerank_default = settings.search.rerank;
    let store = RagStore::init(settings)?;
    let outcome = execute(&store, cli.command, default_top_k, rerank_default).await;
    store.close().await?;
    outcome
}

async fn execute(
    store: &RagStore,
    command: Commands,
    default_top_k: usize,
    rerank_default: bool,
) -> Result<()> {
    match command {
        Commands::Add { text, source, meta } => {
            let mut metadata = metadata_from_pairs(&meta)?;
            metadata.source = source;
            let record = store.embed(&text, metadata).await?;
            print_json(&serde_json::json!({
                "id": record.id,
                "dimension": record.vector.len(),
                "metadata": record.metadata,
            }))
        }
        Commands::Ingest { path, chunk_size } => {
            let text = std::fs::read_to_string(&path).map_err(|source| RagError::FileRead {
                path: path.clone(),
                source,
            })?;
            let mut metadata = Metadata::default();
            metadata.source = Some(path.display().to_string());
            metadata.kind = Some("document".to_string());
            let chunks = store.ingest(&text, metadata, chunk_size)?;
            let outcome = store.flush().await?;
            print_json(&serde_json::json!({
                "chunks": chunks,
                "flush": format!("{outcome:?}"),
            }))
        }
        Commands::Search {
            query,
            top_k,
            filter,
            no_rerank,
        } => {
            let filter = parse_filter(filter.iter().map(String::as_str))?;
            let options = SearchOptions {
                rerank: rerank_default && !no_rerank,
                skip_cache: false,
            };
            let results = store
                .search(&query, top_k.unwrap_or(default_top_k), &filter, options)
                .await?;
            print_json(&results)
        }
        Commands::Get { id } => {
            let record = store.get_vector(&VectorId::new(id)).await?;
            print_json(&record)
        }
        Commands::Delete { id } => {
            let deleted = store.delete_vector(&VectorId::new(id)).await?;
            print_json(&serde_json::json!({ "deleted": deleted }))
        }
        Commands::Stats => {
            let stats = store.stats().await?;
            print_json(&stats)
        }
        Commands::Cluster {
            method,
            k,
            threshold,
            filter,
        } => {
            let filter = parse_filter(filter.iter().map(String::as_str))?;
            let clusters = match method {
                ClusterMethod::Kmeans => store.cluster_kmeans(k, &filter).await?,
                ClusterMethod::Hierarchical => {
                    store.cluster_hierarchical(threshold, &filter).await?
                }
            };
            print_json(&clusters)
        }
        Commands::Init { .. } | Commands::Config => Ok(()),
    }
}

fn metadata_from_pairs(pairs: &[String]) -> Result<Metadata> {
    let filter = parse_filter(pairs.iter().map(String::as_str))?;
    let metadata = filter
        .iter()
        .fold(Metadata::default(), |metadata, (key, value)| {
            metadata.with_extra(key.clone(), value.clone())
        });
    Ok(metadata)
}
