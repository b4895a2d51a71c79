//! # githelp CLI
//!
//! Command-line front end for the ingestion and question pipeline.
//!
//! ```bash
//! githelp --config ./githelp.toml ingest my-project
//! githelp --config ./githelp.toml ask my-project "How is auth handled?"
//! ```
//!
//! Credentials come from the environment: `PINECONE_API_KEY` for the vector
//! index and `OPENAI_API_KEY` for the embedding and completion models.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use githelp::completion::OpenAiCompletion;
use githelp::config::{load_config, Config};
use githelp::embedding::OpenAiEmbeddings;
use githelp::ingest::IngestionCoordinator;
use githelp::repo_files::scan_repository;
use githelp::retrieval::RetrievalEngine;
use githelp::store::{create_index, ChunkStore};
use githelp::synthesize::{encode_citations, AnswerSynthesizer};

/// Ask questions about a code repository, grounded in its actual source.
#[derive(Parser)]
#[command(
    name = "githelp",
    about = "Answer questions about a code repository with citation-grounded retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./githelp.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed, and index the configured repository files.
    ///
    /// Re-running with unchanged files updates nothing; changed files are
    /// re-embedded and files removed from the repository are pruned from
    /// the index. At most one ingestion runs per project at a time.
    Ingest {
        /// Project identifier scoping the index records.
        project: String,
    },

    /// Ask a question against a project's indexed chunks.
    Ask {
        /// Project identifier scoping retrieval.
        project: String,
        /// The question to answer.
        question: String,
        /// Override the configured number of chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,
    },
}

fn build_store(config: &Config) -> Result<ChunkStore> {
    let index = create_index(&config.index)?;
    Ok(ChunkStore::new(index, config.index.batch_size))
}

async fn run_ingest(config: &Config, project: &str) -> Result<()> {
    let files_config = config
        .files
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[files] section required for ingest"))?;

    let files = scan_repository(files_config)?;
    let store = build_store(config)?;
    let embeddings = Arc::new(OpenAiEmbeddings::from_config(&config.embedding)?);

    let coordinator = IngestionCoordinator::new(
        store,
        embeddings,
        config.chunking.clone(),
        config.embedding.clone(),
        &config.ingest,
    );

    let report = coordinator.ingest(project, &files).await?;

    println!("ingest {}", project);
    println!("  files scanned: {}", files.len());
    println!("  chunks updated: {}", report.chunks_updated);
    println!("  chunks skipped: {}", report.chunks_skipped);
    println!("  chunks pruned: {}", report.chunks_pruned);
    if report.errors.is_empty() {
        println!("ok");
    } else {
        println!("  errors: {}", report.errors.len());
        for error in &report.errors {
            eprintln!("  ! {}", error);
        }
        anyhow::bail!("ingestion finished with {} errors", report.errors.len());
    }
    Ok(())
}

async fn run_ask(
    config: &Config,
    project: &str,
    question: &str,
    top_k: Option<usize>,
) -> Result<()> {
    let store = build_store(config)?;
    let embeddings = Arc::new(OpenAiEmbeddings::from_config(&config.embedding)?);
    let completion = Arc::new(OpenAiCompletion::from_config(&config.completion)?);

    let engine = RetrievalEngine::new(store, embeddings, &config.retrieval);
    let synthesizer = AnswerSynthesizer::new(
        completion,
        Duration::from_secs(config.completion.timeout_secs),
    );

    let retrieved = engine.retrieve(project, question, top_k).await?;
    let answer = synthesizer.synthesize(question, &retrieved).await?;

    println!("{}", answer.answer);
    if !answer.citations.is_empty() {
        println!();
        println!("Sources:");
        for citation in &answer.citations {
            println!("  {}#{}", citation.path, citation.chunk_index);
        }
    }
    // Machine-readable line for the caller persisting the answer row.
    eprintln!("citations: {}", encode_citations(&answer.citations));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { project } => run_ingest(&config, &project).await,
        Commands::Ask {
            project,
            question,
            top_k,
        } => run_ask(&config, &project, &question, top_k).await,
    }
}
