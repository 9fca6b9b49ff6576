//! kbseed CLI - Command-line interface
//!
//! Usage:
//!   kbseed seed [--chunks <path>] [--videos <path>] [--staged]
//!   kbseed query <question> [-k N] [--json] [--context]
//!   kbseed count
//!   kbseed clear
//!   kbseed config
//!
//! `seed` replaces the whole collection. Run at most one seed at a time per
//! collection; readers see a partial collection while it runs.

use anyhow::Context;
use clap::{Parser, Subcommand};
use kbseed_core::{AppConfig, ClearPolicy, LoggingConfig};
use kbseed_rag::{
    build_context, IngestOptions, IngestionOrchestrator, JsonChunkFile, QueryService,
    VideoManifestFile,
};
use kbseed_vector::{ChromaCollection, HuggingFaceEmbedding, VectorCollection};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const SNIPPET_CHARS: usize = 80;

#[derive(Parser)]
#[command(name = "kbseed")]
#[command(about = "Seed and query a vector-store knowledge base")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the collection with freshly embedded chunks and videos
    Seed {
        /// Chunk file produced by the document loader
        #[arg(long)]
        chunks: Option<PathBuf>,
        /// Video manifest
        #[arg(long)]
        videos: Option<PathBuf>,
        /// Clear only after everything has been embedded
        #[arg(long)]
        staged: bool,
    },
    /// Return the documents closest to a question
    Query {
        /// Question to ask
        question: String,
        /// Number of matches
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Print the raw result as JSON
        #[arg(long)]
        json: bool,
        /// Print the assembled context instead of the match list
        #[arg(long, conflicts_with = "json")]
        context: bool,
    },
    /// Number of documents in the collection
    Count,
    /// Delete every document in the collection
    Clear,
    /// Print the effective configuration with secrets masked
    Config,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn collection(config: &AppConfig) -> anyhow::Result<Arc<ChromaCollection>> {
    let collection = ChromaCollection::from_config(&config.store)
        .context("failed to create vector store client")?;
    Ok(Arc::new(collection))
}

fn embedder(config: &AppConfig) -> anyhow::Result<Arc<HuggingFaceEmbedding>> {
    let embedder = HuggingFaceEmbedding::from_config(&config.embedding)
        .context("failed to create embedding client")?;
    Ok(Arc::new(embedder))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    if let Commands::Config = cli.command {
        print!("{}", toml::to_string_pretty(&config.redacted())?);
        return Ok(());
    }
    config.validate()?;

    match cli.command {
        Commands::Seed {
            chunks,
            videos,
            staged,
        } => {
            let mut options = IngestOptions::from(&config.ingest);
            if staged {
                options.clear_policy = ClearPolicy::Staged;
            }
            let chunks = JsonChunkFile::new(chunks.unwrap_or(config.ingest.chunks_path.clone()));
            let videos =
                VideoManifestFile::new(videos.unwrap_or(config.ingest.videos_path.clone()));

            let orchestrator =
                IngestionOrchestrator::new(embedder(&config)?, collection(&config)?, options);
            let report = orchestrator
                .run(&chunks, &videos)
                .await
                .context("ingestion failed")?;

            println!("Inputs:   {}", report.total_inputs);
            println!("Cleared:  {}", report.cleared);
            println!("Uploaded: {}", report.uploaded);
            println!("Verified: {}", report.verified_count);
            println!("Skipped:  {}", report.skipped.len());
            for skipped in &report.skipped {
                println!("  - {}: {}", skipped.id, skipped.reason);
            }
            println!("Elapsed:  {} ms", report.elapsed().num_milliseconds());
            if !report.is_verified() {
                tracing::warn!(
                    uploaded = report.uploaded,
                    verified = report.verified_count,
                    "Store count differs from uploaded documents"
                );
            }
        }
        Commands::Query {
            question,
            top_k,
            json,
            context,
        } => {
            let mut service =
                QueryService::new(embedder(&config)?, collection(&config)?, &config.query);
            if let Some(k) = top_k {
                service = service.with_top_k(k);
            }
            let result = service.answer_query(&question).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if context {
                println!("{}", build_context(&result));
            } else if result.is_empty() {
                println!("No matches.");
            } else {
                for (rank, m) in result.iter().enumerate() {
                    let source = m
                        .metadata
                        .get("source")
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    let snippet: String = m
                        .document
                        .as_deref()
                        .unwrap_or_default()
                        .chars()
                        .take(SNIPPET_CHARS)
                        .collect();
                    println!(
                        "{}. [{:.4}] {} ({}) {}",
                        rank + 1,
                        m.distance,
                        m.id,
                        source,
                        snippet
                    );
                }
            }
        }
        Commands::Count => {
            let collection = collection(&config)?;
            println!("{}: {}", collection.name(), collection.count().await);
        }
        Commands::Clear => {
            let collection = collection(&config)?;
            let deleted = collection.clear_collection().await?;
            println!("Deleted {} documents from {}", deleted, collection.name());
        }
        Commands::Config => {}
    }

    Ok(())
}
