//! Hybrid retrieval: concurrent vector and lexical candidate phases,
//! score fusion, and per-document deduplication.
//!
//! The two candidate phases run concurrently, each under its own timeout
//! and observing the caller's cancellation token. Degradation is preferred
//! over failure: in hybrid mode a failed or timed-out vector phase leaves
//! a lexical-only result set and vice versa; only when both phases time
//! out does the query fail. Semantic-only queries have no fallback, so an
//! unavailable embedding provider is fatal there.
//!
//! Fusion works on an outer union of the two candidate sets. A document
//! absent from one side contributes zero for that side's score, keeping a
//! strong single-signal match rankable above a weak double-signal one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::embedding::EmbeddingGateway;
use crate::error::RetrievalError;
use crate::models::{
    ChunkType, RetrievalRequest, RetrievalResponse, RetrievedDocument, SearchMode,
};
use crate::store::{LexicalHit, Store, VectorHit};

pub struct Retriever {
    store: Arc<dyn Store>,
    gateway: Option<Arc<EmbeddingGateway>>,
    fan_out: usize,
    /// Hybrid fusion weight applied when a request leaves its own unset.
    semantic_weight: f64,
    phase_timeout: Duration,
}

enum Phase<T> {
    Hits(Vec<T>),
    TimedOut,
    Skipped,
}

impl<T> Phase<T> {
    fn timed_out(&self) -> bool {
        matches!(self, Phase::TimedOut)
    }

    fn into_hits(self) -> Vec<T> {
        match self {
            Phase::Hits(hits) => hits,
            _ => Vec::new(),
        }
    }
}

/// Per-document fusion state: the best contributing chunk from each side.
struct DocCandidate {
    semantic: Option<f64>,
    lexical_raw: Option<f64>,
    chunk_text: String,
    chunk_type: ChunkType,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Option<Arc<EmbeddingGateway>>,
        fan_out: usize,
        semantic_weight: f64,
        phase_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            fan_out: fan_out.max(1),
            semantic_weight: semantic_weight.clamp(0.0, 1.0),
            phase_timeout,
        }
    }

    /// Execute one retrieval request.
    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResponse, RetrievalError> {
        if request.query_text.trim().is_empty() {
            return Ok(RetrievalResponse {
                results: Vec::new(),
                total_candidates_considered: 0,
            });
        }

        let match_count = request.match_count();
        let k = match_count * self.fan_out;

        let query_vec = self.embed_query(request, cancel).await?;

        let run_lexical = request.mode == SearchMode::Hybrid;
        let (vector_phase, lexical_phase) = tokio::join!(
            self.vector_phase(query_vec.as_deref(), k, request, cancel),
            self.lexical_phase(run_lexical, k, request, cancel),
        );
        let vector_phase = vector_phase?;
        let lexical_phase = lexical_phase?;

        match request.mode {
            SearchMode::Semantic => {
                if vector_phase.timed_out() {
                    return Err(RetrievalError::Unavailable(
                        "vector phase timed out".to_string(),
                    ));
                }
            }
            SearchMode::Hybrid => {
                // A vector side that never ran (no backend, failed query
                // embed) cannot back up a dead lexical side.
                if lexical_phase.timed_out() {
                    match &vector_phase {
                        Phase::TimedOut => return Err(RetrievalError::AllPhasesTimedOut),
                        Phase::Skipped => {
                            return Err(RetrievalError::Unavailable(
                                "lexical phase timed out and no vector phase was available"
                                    .to_string(),
                            ))
                        }
                        Phase::Hits(_) => {
                            warn!("lexical phase timed out, serving semantic-only results")
                        }
                    }
                }
                if vector_phase.timed_out() {
                    warn!("vector phase timed out, serving lexical-only results");
                }
            }
        }

        let vector_hits = vector_phase.into_hits();
        let lexical_hits = lexical_phase.into_hits();
        let total_candidates_considered = vector_hits.len() + lexical_hits.len();
        debug!(
            vector = vector_hits.len(),
            lexical = lexical_hits.len(),
            "candidate phases complete"
        );

        let candidates = fuse(vector_hits, lexical_hits);
        let results = self
            .rank(candidates, request, match_count)
            .await
            .map_err(RetrievalError::Store)?;

        Ok(RetrievalResponse {
            results,
            total_candidates_considered,
        })
    }

    /// Embed the query, or decide how to proceed without a vector.
    async fn embed_query(
        &self,
        request: &RetrievalRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<f32>>, RetrievalError> {
        let Some(gateway) = &self.gateway else {
            return match request.mode {
                SearchMode::Semantic => Err(RetrievalError::Unavailable(
                    "no embedding backend configured".to_string(),
                )),
                SearchMode::Hybrid => {
                    warn!("no embedding backend configured, degrading to lexical-only");
                    Ok(None)
                }
            };
        };

        match gateway.embed_query(&request.query_text, cancel).await {
            Ok(vec) => Ok(Some(vec)),
            Err(crate::error::EmbedError::Cancelled) => Err(RetrievalError::Cancelled),
            Err(e) => match request.mode {
                SearchMode::Semantic => Err(RetrievalError::Unavailable(e.to_string())),
                SearchMode::Hybrid => {
                    warn!(error = %e, "query embedding failed, degrading to lexical-only");
                    Ok(None)
                }
            },
        }
    }

    async fn vector_phase(
        &self,
        query_vec: Option<&[f32]>,
        k: usize,
        request: &RetrievalRequest,
        cancel: &CancellationToken,
    ) -> Result<Phase<VectorHit>, RetrievalError> {
        let (Some(query_vec), Some(gateway)) = (query_vec, &self.gateway) else {
            return Ok(Phase::Skipped);
        };

        let search = self
            .store
            .vector_search(gateway.backend(), query_vec, k, &request.filters);
        tokio::select! {
            _ = cancel.cancelled() => Err(RetrievalError::Cancelled),
            outcome = tokio::time::timeout(self.phase_timeout, search) => match outcome {
                Ok(hits) => Ok(Phase::Hits(hits?)),
                Err(_) => Ok(Phase::TimedOut),
            },
        }
    }

    async fn lexical_phase(
        &self,
        run: bool,
        k: usize,
        request: &RetrievalRequest,
        cancel: &CancellationToken,
    ) -> Result<Phase<LexicalHit>, RetrievalError> {
        if !run {
            return Ok(Phase::Skipped);
        }

        let search = self
            .store
            .lexical_search(&request.query_text, k, &request.filters);
        tokio::select! {
            _ = cancel.cancelled() => Err(RetrievalError::Cancelled),
            outcome = tokio::time::timeout(self.phase_timeout, search) => match outcome {
                Ok(hits) => Ok(Phase::Hits(hits?)),
                Err(_) => Ok(Phase::TimedOut),
            },
        }
    }

    /// Score, order, and truncate the fused candidates.
    async fn rank(
        &self,
        candidates: HashMap<String, DocCandidate>,
        request: &RetrievalRequest,
        match_count: usize,
    ) -> anyhow::Result<Vec<RetrievedDocument>> {
        let weight = request
            .semantic_weight
            .unwrap_or(self.semantic_weight)
            .clamp(0.0, 1.0);
        let hybrid = request.mode == SearchMode::Hybrid;

        let mut results: Vec<RetrievedDocument> = Vec::with_capacity(candidates.len());
        for (doc_id, cand) in candidates {
            let Some(meta) = self.store.get_document_metadata(&doc_id).await? else {
                continue;
            };
            let combined = if hybrid {
                Some(
                    weight * cand.semantic.unwrap_or(0.0)
                        + (1.0 - weight) * cand.lexical_raw.unwrap_or(0.0),
                )
            } else {
                None
            };
            results.push(RetrievedDocument {
                document_id: meta.id,
                primary_identifier: meta.primary_identifier,
                title: meta.title,
                date: meta.date,
                semantic_score: cand.semantic,
                lexical_score: if hybrid { cand.lexical_raw } else { None },
                combined_score: combined,
                chunk_text: cand.chunk_text,
                chunk_type: cand.chunk_type,
            });
        }

        // Combined score descending, then recency (undated last), then
        // document id for a stable total order.
        results.sort_by(|a, b| {
            let score_a = a.combined_score.or(a.semantic_score).unwrap_or(0.0);
            let score_b = b.combined_score.or(b.semantic_score).unwrap_or(0.0);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| match (b.date, a.date) {
                    (Some(db), Some(da)) => db.cmp(&da),
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        results.truncate(match_count);
        Ok(results)
    }
}

/// Outer union of the candidate sets, one [`DocCandidate`] per document.
///
/// The semantic side keeps each document's closest chunk; the lexical
/// side's raw score is normalized against the maximum in this candidate
/// set (0 when the set is empty or all-zero).
fn fuse(vector_hits: Vec<VectorHit>, lexical_hits: Vec<LexicalHit>) -> HashMap<String, DocCandidate> {
    let mut candidates: HashMap<String, DocCandidate> = HashMap::new();

    for hit in vector_hits {
        let semantic = 1.0 - hit.distance;
        let entry = candidates
            .entry(hit.doc_id.clone())
            .or_insert_with(|| DocCandidate {
                semantic: Some(semantic),
                lexical_raw: None,
                chunk_text: hit.text.clone(),
                chunk_type: hit.chunk_type,
            });
        if semantic > entry.semantic.unwrap_or(f64::NEG_INFINITY) {
            entry.semantic = Some(semantic);
            entry.chunk_text = hit.text;
            entry.chunk_type = hit.chunk_type;
        }
    }

    let max_lexical = lexical_hits
        .iter()
        .map(|h| h.raw_score)
        .fold(0.0f64, f64::max);

    for hit in lexical_hits {
        let normalized = if max_lexical > 0.0 {
            hit.raw_score / max_lexical
        } else {
            0.0
        };
        candidates
            .entry(hit.doc_id)
            .and_modify(|c| c.lexical_raw = Some(normalized))
            .or_insert(DocCandidate {
                semantic: None,
                lexical_raw: Some(normalized),
                chunk_text: hit.snippet,
                chunk_type: ChunkType::Unknown,
            });
    }

    candidates
}
