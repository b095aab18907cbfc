//! Core data models used throughout lexsearch.
//!
//! These types represent the documents, chunks, citation mentions, and
//! retrieval requests/responses that flow through the ingestion and
//! retrieval pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The kind of legal document a row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    /// A court judgment.
    Case,
    /// A single section of a statute.
    StatuteSection,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Case => "case",
            DocType::StatuteSection => "statute_section",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "case" => Some(DocType::Case),
            "statute_section" => Some(DocType::StatuteSection),
            _ => None,
        }
    }
}

/// A legal document as supplied by the ingestion collaborator.
///
/// Raw text is immutable once embedded; re-ingestion replaces the chunk
/// generation for the document as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub doc_type: DocType,
    /// Display title, e.g. the case name or section heading.
    pub title: String,
    /// Canonical identifier, e.g. a neutral citation like `[2021] HKCFA 5`
    /// or a statute path like `Cap. 57 s. 9`.
    pub primary_identifier: String,
    /// Other identifiers this document is known by (law-report citations,
    /// parallel citations).
    #[serde(default)]
    pub alternate_identifiers: Vec<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    /// Decision date for cases, commencement date for statute sections.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub raw_text: String,
    #[serde(default = "default_metadata")]
    pub metadata_json: String,
}

fn default_metadata() -> String {
    "{}".to_string()
}

/// Heuristic label attached to a chunk by the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Facts,
    Issues,
    Reasoning,
    Order,
    SectionBody,
    Schedule,
    Unknown,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Facts => "facts",
            ChunkType::Issues => "issues",
            ChunkType::Reasoning => "reasoning",
            ChunkType::Order => "order",
            ChunkType::SectionBody => "section_body",
            ChunkType::Schedule => "schedule",
            ChunkType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "facts" => ChunkType::Facts,
            "issues" => ChunkType::Issues,
            "reasoning" => ChunkType::Reasoning,
            "order" => ChunkType::Order,
            "section_body" => ChunkType::SectionBody,
            "schedule" => ChunkType::Schedule,
            _ => ChunkType::Unknown,
        }
    }
}

/// A contiguous, paragraph-respecting slice of a document.
///
/// Produced only by the chunker. `chunk_index` is contiguous within a
/// document and stable across re-chunking of identical text (snippet
/// highlighting references it); the chunk id is derived from
/// `(doc_id, chunk_index)` so identical input yields identical ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub chunk_type: ChunkType,
    /// Paragraph numbers harvested from `[n]` / `(n)` / `n.` markers.
    pub paragraph_numbers: Option<Vec<u32>>,
    /// Structural path for statute text, e.g. `"Part 3 > s.4 > (2)"`.
    pub section_path: Option<String>,
    /// SHA-256 of the chunk text, used for embedding staleness detection.
    pub hash: String,
}

/// An occurrence of citation-shaped text inside a document, optionally
/// resolved against the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationMention {
    pub source_doc_id: String,
    /// Normalized citation text, e.g. `"[2020] HKCFI 123"`.
    pub citation: String,
    #[serde(default)]
    pub case_name: Option<String>,
    #[serde(default)]
    pub resolved_doc_id: Option<String>,
    #[serde(default)]
    pub is_in_corpus: bool,
}

/// Lightweight document metadata used to enrich search and citation results
/// without fetching full text.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentMetadata {
    pub id: String,
    pub doc_type: DocType,
    pub title: String,
    pub primary_identifier: String,
    pub jurisdiction: Option<String>,
    pub date: Option<NaiveDate>,
}

/// Metadata filters pushed down into both candidate phases before ranking.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrievalFilters {
    #[serde(rename = "type")]
    pub doc_type: Option<DocType>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub jurisdiction: Option<String>,
}

/// Retrieval mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Hybrid,
}

/// Hard cap on `match_count`.
pub const MAX_MATCH_COUNT: usize = 100;

/// Default `match_count` when the caller leaves it unset.
pub const DEFAULT_MATCH_COUNT: usize = 20;

/// Default weight of the semantic signal in hybrid fusion.
pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.7;

/// A single retrieval request. Stateless; one per query.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query_text: String,
    pub mode: SearchMode,
    /// Weight of the semantic score in `[0, 1]`; when unset, the
    /// retriever's configured default applies.
    pub semantic_weight: Option<f64>,
    /// Number of documents to return; defaults to 20, capped at 100.
    pub match_count: Option<usize>,
    pub filters: RetrievalFilters,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            query_text: query.into(),
            mode,
            semantic_weight: None,
            match_count: None,
            filters: RetrievalFilters::default(),
        }
    }

    /// Effective match count, defaulted and capped.
    pub fn match_count(&self) -> usize {
        self.match_count
            .unwrap_or(DEFAULT_MATCH_COUNT)
            .clamp(1, MAX_MATCH_COUNT)
    }
}

/// One ranked document in a retrieval response.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDocument {
    pub document_id: String,
    pub primary_identifier: String,
    pub title: String,
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_score: Option<f64>,
    /// The chunk backing this document's strongest contributing signal.
    pub chunk_text: String,
    pub chunk_type: ChunkType,
}

/// Ordered retrieval results plus bookkeeping for the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResponse {
    pub results: Vec<RetrievedDocument>,
    /// Candidates examined across both phases before dedup and truncation.
    pub total_candidates_considered: usize,
}

/// An incoming-citation result: a document that cites the queried one.
#[derive(Debug, Clone, Serialize)]
pub struct CitingDocument {
    pub doc_id: String,
    pub primary_identifier: String,
    pub title: String,
    pub date: Option<NaiveDate>,
}
