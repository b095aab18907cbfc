//! # lexsearch
//!
//! A retrieval and citation-resolution engine for legal documents.
//!
//! lexsearch ingests judgments and statute sections, splits them into
//! paragraph-respecting chunks, embeds the chunks through a closed set of
//! embedding backends, and answers queries with hybrid (vector + lexical)
//! ranked retrieval deduplicated per document. Alongside retrieval it
//! extracts citations from document text, resolves them against the
//! corpus, and serves the resulting citation graph in both directions.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────────┐   ┌───────────┐
//! │  JSONL    │──▶│  Pipeline             │──▶│  SQLite    │
//! │  source   │   │ chunk+cite+embed     │   │ FTS5+Vec  │
//! └───────────┘   └──────────────────────┘   └─────┬─────┘
//!                                                  │
//!                              ┌───────────────────┤
//!                              ▼                   ▼
//!                       ┌────────────┐      ┌────────────┐
//!                       │ Retriever  │      │  Citation  │
//!                       │  (hybrid)  │      │   graph    │
//!                       └────────────┘      └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lexsearch init                          # create database
//! lexsearch ingest corpus.jsonl           # ingest documents
//! lexsearch embed pending                 # backfill embeddings
//! lexsearch search "duty of care" --mode hybrid
//! lexsearch cite incoming <doc_id>        # who cites this document?
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Domain error taxonomy |
//! | [`chunker`] | Paragraph-respecting, overlapping chunking |
//! | [`citations`] | Citation grammar registry and extraction |
//! | [`graph`] | Citation resolution and reverse lookups |
//! | [`embedding`] | Embedding backends, providers, batching gateway |
//! | [`store`] | Storage trait, in-memory and SQLite backends |
//! | [`retriever`] | Hybrid vector + lexical retrieval |
//! | [`ingest`] | Ingestion pipeline and embedding backfill |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod citations;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod store;
