//! Storage abstraction for the retrieval engine.
//!
//! The [`Store`] trait defines every persistence operation the pipeline
//! and retriever need, so backends are pluggable: the bundled SQLite
//! store for real corpora, the in-memory store for tests. The vector
//! methods are the seam where an approximate nearest-neighbor index
//! plugs in; both bundled stores answer them with an exact scan, which
//! doubles as the correctness fallback for any approximate index.
//!
//! Implementations must be `Send + Sync`.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingBackend;
use crate::models::{
    Chunk, ChunkType, CitationMention, Document, DocumentMetadata, RetrievalFilters,
};

/// One embedding row destined for `(chunk_id, backend)`.
///
/// Text is carried alongside the vector for snippet display. Rows
/// imported without text are valid, degraded entries tagged
/// [`ChunkType::Unknown`].
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub text: Option<String>,
    pub chunk_type: ChunkType,
}

impl EmbeddingRecord {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            vector,
            text: Some(chunk.text.clone()),
            chunk_type: chunk.chunk_type,
        }
    }

    /// Effective chunk type: entries without text degrade to `Unknown`.
    pub fn effective_chunk_type(&self) -> ChunkType {
        if self.text.is_some() {
            self.chunk_type
        } else {
            ChunkType::Unknown
        }
    }
}

/// A nearest-neighbor hit from one backend's vector index.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub doc_id: String,
    /// Cosine distance in `[0, 2]`; lower is closer.
    pub distance: f64,
    pub text: String,
    pub chunk_type: ChunkType,
}

/// A document-level hit from the lexical index.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub doc_id: String,
    /// Raw term-weighted relevance; higher is better. Normalized by the
    /// retriever against the current candidate set.
    pub raw_score: f64,
    pub snippet: String,
}

/// A `(doc_id, identifier)` pair from the corpus identifier index,
/// covering primary and alternate identifiers alike.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierEntry {
    pub doc_id: String,
    pub identifier: String,
}

/// Abstract storage backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a document row. Raw text is owned by the
    /// ingestion collaborator; this core never rewrites it afterwards.
    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn get_document_metadata(&self, id: &str) -> Result<Option<DocumentMetadata>>;

    /// Merge additional alternate identifiers discovered at extraction
    /// time (header/caption citations) into the document row.
    async fn add_alternate_identifiers(&self, doc_id: &str, identifiers: &[String]) -> Result<()>;

    /// Replace the document's chunk generation atomically. Old chunks,
    /// their embeddings (every backend), and lexical entries go together;
    /// partial patching of a generation is not possible.
    async fn replace_chunks(&self, doc_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Idempotent embedding write keyed by `(chunk_id, backend)`:
    /// re-running the same job yields identical state, never duplicates.
    async fn upsert_embeddings(
        &self,
        doc_id: &str,
        backend: EmbeddingBackend,
        records: &[EmbeddingRecord],
    ) -> Result<()>;

    /// Chunks with no embedding for `backend`, or whose text hash no
    /// longer matches the stored one. Drives the resumable embed job.
    async fn pending_chunks(&self, backend: EmbeddingBackend) -> Result<Vec<Chunk>>;

    /// Drop every embedding row for `backend`. Used by the rebuild job
    /// when switching models or dimensions.
    async fn clear_embeddings(&self, backend: EmbeddingBackend) -> Result<()>;

    /// Number of embedding rows stored for `backend`.
    async fn embedding_count(&self, backend: EmbeddingBackend) -> Result<u64>;

    /// Nearest chunks to `query_vec` in `backend`'s index, any document,
    /// with metadata filters pushed down before ranking.
    async fn vector_search(
        &self,
        backend: EmbeddingBackend,
        query_vec: &[f32],
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<VectorHit>>;

    /// Documents ranked by term-weighted relevance over full text, same
    /// filters.
    async fn lexical_search(
        &self,
        query: &str,
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<LexicalHit>>;

    /// Replace the document's outgoing mention set.
    async fn replace_mentions(&self, doc_id: &str, mentions: &[CitationMention]) -> Result<()>;

    async fn outgoing_mentions(&self, doc_id: &str) -> Result<Vec<CitationMention>>;

    /// Every `(doc_id, identifier)` pair in the corpus.
    async fn identifier_index(&self) -> Result<Vec<IdentifierEntry>>;

    /// Ids of documents holding a mention whose normalized text equals any
    /// of `identifiers`. The live side of the reverse-citation join.
    async fn citing_doc_ids(&self, identifiers: &[String]) -> Result<Vec<String>>;

    /// Every `(source_doc_id, citation)` mention pair in the corpus, for
    /// building the reverse-citation snapshot.
    async fn citation_edges(&self) -> Result<Vec<(String, String)>>;
}

/// Reject any record whose vector length disagrees with the backend's
/// declared dimension. Enforced at the store boundary as well as in the
/// gateway, so no caller can persist a mismatched vector.
pub(crate) fn check_dimensions(
    backend: EmbeddingBackend,
    records: &[EmbeddingRecord],
) -> Result<()> {
    for record in records {
        if record.vector.len() != backend.dimension() {
            anyhow::bail!(
                "chunk {}: {}-dim vector for backend '{}', expected {}",
                record.chunk_id,
                record.vector.len(),
                backend.name(),
                backend.dimension()
            );
        }
    }
    Ok(())
}

/// Whether a document passes the pushed-down metadata filters.
pub(crate) fn metadata_passes(meta: &DocumentMetadata, filters: &RetrievalFilters) -> bool {
    if let Some(dt) = filters.doc_type {
        if meta.doc_type != dt {
            return false;
        }
    }
    if let Some(ref j) = filters.jurisdiction {
        if meta.jurisdiction.as_deref() != Some(j.as_str()) {
            return false;
        }
    }
    if let Some(from) = filters.date_from {
        match meta.date {
            Some(d) if d >= from => {}
            _ => return false,
        }
    }
    if let Some(to) = filters.date_to {
        match meta.date {
            Some(d) if d <= to => {}
            _ => return false,
        }
    }
    true
}
