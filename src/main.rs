//! # lexsearch CLI
//!
//! The `lexsearch` binary drives the retrieval engine: database
//! initialization, JSONL ingestion, embedding management, hybrid search,
//! and citation graph queries.
//!
//! ## Usage
//!
//! ```bash
//! lexsearch --config ./config/lexsearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lexsearch init` | Create the SQLite database and run schema migrations |
//! | `lexsearch ingest <file.jsonl>` | Ingest documents: chunk, extract citations, embed, store |
//! | `lexsearch embed pending` | Backfill missing or stale embeddings |
//! | `lexsearch embed rebuild` | Delete and regenerate all embeddings for the configured backend |
//! | `lexsearch search "<query>"` | Run a retrieval request and print ranked results |
//! | `lexsearch cite outgoing <doc_id>` | Documents cited by a document |
//! | `lexsearch cite incoming <doc_id>` | Documents citing a document |

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lexsearch::citations::CitationRegistry;
use lexsearch::config::{self, Config};
use lexsearch::db;
use lexsearch::embedding::EmbeddingGateway;
use lexsearch::graph::CitationGraph;
use lexsearch::ingest::IngestPipeline;
use lexsearch::migrate;
use lexsearch::models::{DocType, RetrievalFilters, RetrievalRequest, SearchMode};
use lexsearch::retriever::Retriever;
use lexsearch::store::sqlite::SqliteStore;
use lexsearch::store::Store;

/// lexsearch — hybrid retrieval and citation resolution for legal corpora.
#[derive(Parser)]
#[command(
    name = "lexsearch",
    about = "Hybrid retrieval and citation resolution for legal document corpora",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lexsearch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent — running it against an existing database is safe.
    Init,

    /// Ingest documents from a JSONL file.
    ///
    /// Each line is one document. Failed lines are reported and skipped;
    /// the run continues. After the file is processed, citation mentions
    /// are re-resolved corpus-wide so forward references land.
    Ingest {
        /// Path to the JSONL document source.
        file: PathBuf,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Search the corpus.
    Search {
        /// The query text.
        query: String,

        /// Search mode: `semantic` (vector only) or `hybrid` (vector + lexical).
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Weight of the semantic signal in hybrid fusion, in [0, 1].
        #[arg(long)]
        weight: Option<f64>,

        /// Maximum number of documents to return (capped at 100).
        #[arg(long)]
        limit: Option<usize>,

        /// Filter by document type: `case` or `statute_section`.
        #[arg(long = "type")]
        doc_type: Option<String>,

        /// Filter by jurisdiction code (e.g. `HK`).
        #[arg(long)]
        jurisdiction: Option<String>,

        /// Only documents dated on or after this date (YYYY-MM-DD).
        #[arg(long)]
        date_from: Option<String>,

        /// Only documents dated on or before this date (YYYY-MM-DD).
        #[arg(long)]
        date_to: Option<String>,
    },

    /// Citation graph queries.
    Cite {
        #[command(subcommand)]
        action: CiteAction,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending,

    /// Delete and regenerate all embeddings.
    ///
    /// Useful when switching backends or after bulk re-ingestion.
    Rebuild,
}

#[derive(Subcommand)]
enum CiteAction {
    /// Documents cited by the given document.
    Outgoing {
        /// Document id.
        doc_id: String,
    },
    /// Documents citing the given document, under any of its identifiers.
    Incoming {
        /// Document id.
        doc_id: String,
    },
}

/// Everything the commands need, wired from one config.
struct Engine {
    store: Arc<SqliteStore>,
    graph: Arc<CitationGraph>,
    gateway: Option<Arc<EmbeddingGateway>>,
    config: Config,
}

impl Engine {
    async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config.db).await?;
        let store = Arc::new(SqliteStore::new(pool));
        let graph = Arc::new(CitationGraph::new(
            store.clone(),
            Duration::from_secs(config.retrieval.snapshot_max_age_secs),
        ));
        let gateway = if config.embedding.is_enabled() {
            Some(Arc::new(EmbeddingGateway::from_config(&config.embedding)?))
        } else {
            None
        };
        Ok(Self {
            store,
            graph,
            gateway,
            config,
        })
    }

    fn pipeline(&self) -> Result<IngestPipeline> {
        Ok(IngestPipeline::new(
            self.store.clone(),
            CitationRegistry::new(&self.config.citations)?,
            self.graph.clone(),
            self.gateway.clone(),
            self.config.chunking.clone(),
        ))
    }

    fn retriever(&self) -> Retriever {
        Retriever::new(
            self.store.clone(),
            self.gateway.clone(),
            self.config.retrieval.fan_out,
            self.config.retrieval.semantic_weight,
            Duration::from_millis(self.config.retrieval.phase_timeout_ms),
        )
    }
}

fn parse_filters(
    doc_type: Option<String>,
    jurisdiction: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
) -> Result<RetrievalFilters> {
    let doc_type = match doc_type {
        Some(s) => match DocType::parse(&s) {
            Some(t) => Some(t),
            None => bail!("Unknown document type: {}. Use case or statute_section.", s),
        },
        None => None,
    };
    let parse = |value: Option<String>| -> Result<Option<NaiveDate>> {
        value
            .map(|s| {
                NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .map_err(|_| anyhow::anyhow!("Invalid date: {} (expected YYYY-MM-DD)", s))
            })
            .transpose()
    };
    Ok(RetrievalFilters {
        doc_type,
        jurisdiction,
        date_from: parse(date_from)?,
        date_to: parse(date_to)?,
    })
}

fn cancellation_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file } => {
            let engine = Engine::open(cfg).await?;
            let cancel = cancellation_token();
            let ledger = engine.pipeline()?.run_file(&file, &cancel).await?;
            println!(
                "Ingested {} document(s), {} failed.",
                ledger.processed, ledger.failed
            );
            for (item, error) in &ledger.errors {
                println!("  {item}: {error}");
            }
        }
        Commands::Embed { action } => {
            let engine = Engine::open(cfg).await?;
            let cancel = cancellation_token();
            if let EmbedAction::Rebuild = action {
                let Some(gateway) = &engine.gateway else {
                    bail!("No embedding backend configured. Set [embedding] backend in config.");
                };
                engine.store.clear_embeddings(gateway.backend()).await?;
            }
            let ledger = engine.pipeline()?.embed_pending(&cancel).await?;
            println!(
                "Embedded {} chunk(s), {} failure(s).",
                ledger.processed, ledger.failed
            );
            for (item, error) in &ledger.errors {
                println!("  {item}: {error}");
            }
        }
        Commands::Search {
            query,
            mode,
            weight,
            limit,
            doc_type,
            jurisdiction,
            date_from,
            date_to,
        } => {
            let mode = match mode.as_str() {
                "semantic" => SearchMode::Semantic,
                "hybrid" => SearchMode::Hybrid,
                other => bail!("Unknown search mode: {}. Use semantic or hybrid.", other),
            };
            let engine = Engine::open(cfg).await?;
            let cancel = cancellation_token();

            let request = RetrievalRequest {
                query_text: query,
                mode,
                semantic_weight: weight,
                match_count: limit,
                filters: parse_filters(doc_type, jurisdiction, date_from, date_to)?,
            };
            let response = engine.retriever().retrieve(&request, &cancel).await?;

            if response.results.is_empty() {
                println!("No results.");
            }
            for (rank, result) in response.results.iter().enumerate() {
                let score = result
                    .combined_score
                    .or(result.semantic_score)
                    .or(result.lexical_score)
                    .unwrap_or(0.0);
                println!(
                    "{:2}. [{:.4}] {} — {}{}",
                    rank + 1,
                    score,
                    result.primary_identifier,
                    result.title,
                    result
                        .date
                        .map(|d| format!(" ({d})"))
                        .unwrap_or_default()
                );
                let snippet: String = result.chunk_text.chars().take(200).collect();
                println!("      {} | {}", result.chunk_type.as_str(), snippet);
            }
            println!(
                "({} candidate(s) considered)",
                response.total_candidates_considered
            );
        }
        Commands::Cite { action } => {
            let engine = Engine::open(cfg).await?;
            match action {
                CiteAction::Outgoing { doc_id } => {
                    let outgoing = engine.graph.outgoing(&doc_id).await?;
                    if outgoing.is_empty() {
                        println!("No outgoing citations.");
                    }
                    for citation in outgoing {
                        let name = citation
                            .case_name
                            .map(|n| format!("{n} "))
                            .unwrap_or_default();
                        match citation.cited {
                            Some(meta) => println!(
                                "{name}{} -> {} ({})",
                                citation.citation, meta.title, meta.id
                            ),
                            None => println!("{name}{} (not in corpus)", citation.citation),
                        }
                    }
                }
                CiteAction::Incoming { doc_id } => {
                    let incoming = engine.graph.incoming(&doc_id).await?;
                    if incoming.is_empty() {
                        println!("No incoming citations.");
                    }
                    for citing in incoming {
                        println!(
                            "{} — {}{}",
                            citing.primary_identifier,
                            citing.title,
                            citing
                                .date
                                .map(|d| format!(" ({d})"))
                                .unwrap_or_default()
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
