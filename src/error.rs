//! Error taxonomy for the retrieval engine.
//!
//! Ingestion-time failures are recorded per document in the job ledger and
//! the run continues; retrieval-time failures prefer degradation (hybrid
//! falls back to lexical-only) over hard failure. The CLI and pipeline
//! orchestration layers use `anyhow` and convert into these types only at
//! the component seams.

use thiserror::Error;

/// Malformed chunker input. An empty document is a valid zero-chunk
/// result, not an error.
#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("chunk budget must be greater than zero")]
    ZeroBudget,
}

/// Failure from the embedding gateway or an upstream provider.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Transport, auth, or quota failure from the provider. Batch jobs
    /// record the failing item and continue rather than aborting the run.
    #[error("embedding provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// Provider returned a vector of the wrong length. Fatal for that
    /// record; never silently truncated or padded.
    #[error("backend '{backend}' returned a {got}-dim vector, expected {expected}")]
    DimensionMismatch {
        backend: String,
        expected: usize,
        got: usize,
    },

    #[error("embedding request cancelled")]
    Cancelled,
}

/// Failure from the hybrid retriever after degradation options are
/// exhausted.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Semantic-only query with the embedding provider down.
    #[error("semantic retrieval unavailable: {0}")]
    Unavailable(String),

    /// Both candidate phases timed out in hybrid mode.
    #[error("both vector and lexical phases timed out")]
    AllPhasesTimedOut,

    #[error("retrieval cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
