//! `ragctl` — a small demo CLI over [`rag_core`], the offline RAG engine.
//!
//! This binary exists to exercise the library end to end; production
//! integrations are expected to embed [`rag_core::RagRepository`] directly
//! rather than shell out to this CLI.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rag_core::config::{self, Config};
use rag_core::interfaces::FileDocumentSource;
use rag_core::RagRepository;

#[derive(Parser)]
#[command(
    name = "ragctl",
    about = "ragctl — ingest and query a local retrieval-augmented-generation store",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one or more local files
    Ingest {
        /// Paths to files to ingest
        paths: Vec<PathBuf>,
    },

    /// Search indexed documents
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity score
        #[arg(long)]
        threshold: Option<f64>,

        /// Restrict retrieval to a single document id
        #[arg(long)]
        doc_id: Option<String>,
    },

    /// Show document metadata and stats
    Get {
        /// Document id
        id: String,
    },

    /// List all documents
    ListDocs,

    /// Delete a document
    DeleteDoc {
        /// Document id
        id: String,
    },

    /// Delete all documents
    Clear,
}

fn init_logging(filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    fmt().with_env_filter(env_filter).init();
}

async fn build_repository(cfg: &Config) -> anyhow::Result<RagRepository> {
    let repo = RagRepository::new(cfg)?;

    #[cfg(feature = "local-embeddings-fastembed")]
    {
        let embedder = rag_core::embedding::FastEmbedEmbedder::new(&cfg.embedding)?;
        repo.attach_embedder(Arc::new(embedder)).await;
    }
    #[cfg(all(not(feature = "local-embeddings-fastembed"), feature = "local-embeddings-tract"))]
    {
        let embedder = rag_core::embedding::TractEmbedder::new(&cfg.embedding)?;
        repo.attach_embedder(Arc::new(embedder)).await;
    }
    #[cfg(not(any(feature = "local-embeddings-fastembed", feature = "local-embeddings-tract")))]
    {
        anyhow::bail!("ragctl was built with no embedding backend enabled");
    }

    Ok(repo)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config).unwrap_or_default();
    init_logging(&cfg.logging.filter);

    let repo = build_repository(&cfg).await?;

    match cli.command {
        Commands::Ingest { paths } => {
            let mut sources: Vec<Box<dyn rag_core::interfaces::DocumentSource>> = Vec::new();
            for path in &paths {
                sources.push(Box::new(FileDocumentSource::new(path)?));
            }
            let ids = repo.add_documents(sources).await;
            for (path, id) in paths.iter().zip(ids.iter()) {
                println!("queued {} as {}", path.display(), id);
            }
        }
        Commands::Search { query, limit, threshold, doc_id } => {
            let (default_k, default_threshold, context_max_chars) = repo.retrieval_defaults();
            let k = limit.unwrap_or(default_k);
            let threshold = threshold.unwrap_or(default_threshold);
            let hits = repo.retrieve(&query, k, threshold, doc_id.as_deref()).await?;
            if hits.is_empty() {
                println!("no results");
            } else {
                for hit in &hits {
                    println!("[{:.3}] {} §{} — {}", hit.score, hit.doc_name, hit.chunk_index + 1, truncate(&hit.text, 120));
                }
                if let Some(block) = repo.build_context_block(&hits, context_max_chars) {
                    println!("\n--- context block ---\n{}", block);
                }
            }
        }
        Commands::Get { id } => {
            let docs = repo.snapshot_docs()?;
            match docs.into_iter().find(|d| d.doc_id == id) {
                Some(doc) => {
                    let stats = repo.doc_stats(&doc.doc_id).await?;
                    println!(
                        "{} ({}) status={:?} chunks={} bytes={}",
                        doc.name, doc.doc_id, doc.status, stats.chunk_count, stats.total_bytes
                    );
                }
                None => println!("no such document: {}", id),
            }
        }
        Commands::ListDocs => {
            for doc in repo.snapshot_docs()? {
                println!("{}  {}  {:?}", doc.doc_id, doc.name, doc.status);
            }
        }
        Commands::DeleteDoc { id } => {
            repo.remove_document(&id).await?;
            println!("deleted {}", id);
        }
        Commands::Clear => {
            repo.clear_all().await?;
            println!("cleared all documents");
        }
    }

    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}
