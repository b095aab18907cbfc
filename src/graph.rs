//! Citation graph: resolution of extracted mentions against the corpus,
//! outgoing lookups, and reverse (incoming) lookups.
//!
//! Resolution is an exact equality join between a mention's normalized
//! citation text and the corpus identifier index (primary and alternate
//! identifiers alike). Mentions that do not resolve stay visible with
//! `is_in_corpus = false`; the graph reports what the text says, not just
//! what the corpus holds.
//!
//! Incoming lookups run against a reverse-citation snapshot rebuilt when
//! older than a configured age; if a rebuild fails, the lookup falls back
//! to a live join so a broken snapshot never takes the feature down.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

use crate::models::{CitationMention, CitingDocument, DocumentMetadata};
use crate::store::Store;

/// One outgoing reference, enriched with cited-document metadata when the
/// target is in the corpus.
#[derive(Debug, Clone)]
pub struct OutgoingCitation {
    pub citation: String,
    pub case_name: Option<String>,
    pub is_in_corpus: bool,
    pub cited: Option<DocumentMetadata>,
}

struct ReverseSnapshot {
    built_at: Instant,
    /// cited doc id → citing doc ids, deduplicated and sorted.
    incoming: HashMap<String, Vec<String>>,
}

pub struct CitationGraph {
    store: Arc<dyn Store>,
    snapshot: RwLock<Option<ReverseSnapshot>>,
    snapshot_max_age: Duration,
}

impl CitationGraph {
    pub fn new(store: Arc<dyn Store>, snapshot_max_age: Duration) -> Self {
        Self {
            store,
            snapshot: RwLock::new(None),
            snapshot_max_age,
        }
    }

    /// Resolve extracted mentions against the identifier index.
    ///
    /// A mention that resolves to its own source document is a
    /// self-identifier that escaped header classification and is dropped;
    /// everything else is kept, resolved or not.
    pub async fn resolve_mentions(
        &self,
        mentions: Vec<CitationMention>,
    ) -> Result<Vec<CitationMention>> {
        let index = self.store.identifier_index().await?;
        let by_identifier: HashMap<&str, &str> = index
            .iter()
            .map(|e| (e.identifier.as_str(), e.doc_id.as_str()))
            .collect();

        let mut resolved = Vec::with_capacity(mentions.len());
        for mut mention in mentions {
            match by_identifier.get(mention.citation.as_str()) {
                Some(doc_id) if *doc_id == mention.source_doc_id => continue,
                Some(doc_id) => {
                    mention.resolved_doc_id = Some(doc_id.to_string());
                    mention.is_in_corpus = true;
                }
                None => {
                    mention.resolved_doc_id = None;
                    mention.is_in_corpus = false;
                }
            }
            resolved.push(mention);
        }
        Ok(resolved)
    }

    /// Documents cited by `doc_id`, enriched with metadata where resolved.
    pub async fn outgoing(&self, doc_id: &str) -> Result<Vec<OutgoingCitation>> {
        let mentions = self.store.outgoing_mentions(doc_id).await?;

        let mut out = Vec::with_capacity(mentions.len());
        for mention in mentions {
            let cited = match &mention.resolved_doc_id {
                Some(id) => self.store.get_document_metadata(id).await?,
                None => None,
            };
            out.push(OutgoingCitation {
                citation: mention.citation,
                case_name: mention.case_name,
                is_in_corpus: mention.is_in_corpus,
                cited,
            });
        }
        Ok(out)
    }

    /// Documents citing `doc_id` under any of its identifiers, excluding
    /// the document itself, one entry per citing document.
    pub async fn incoming(&self, doc_id: &str) -> Result<Vec<CitingDocument>> {
        let citing_ids = match self.snapshot_incoming(doc_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "reverse snapshot unavailable, using live join");
                self.live_incoming(doc_id).await?
            }
        };

        let mut results = Vec::with_capacity(citing_ids.len());
        for id in citing_ids {
            if id == doc_id {
                continue;
            }
            if let Some(meta) = self.store.get_document_metadata(&id).await? {
                results.push(CitingDocument {
                    doc_id: meta.id,
                    primary_identifier: meta.primary_identifier,
                    title: meta.title,
                    date: meta.date,
                });
            }
        }
        Ok(results)
    }

    /// Drop the cached snapshot so the next lookup rebuilds it.
    pub async fn invalidate_snapshot(&self) {
        *self.snapshot.write().await = None;
    }

    async fn snapshot_incoming(&self, doc_id: &str) -> Result<Vec<String>> {
        {
            let snapshot = self.snapshot.read().await;
            if let Some(snap) = snapshot.as_ref() {
                if snap.built_at.elapsed() <= self.snapshot_max_age {
                    return Ok(snap.incoming.get(doc_id).cloned().unwrap_or_default());
                }
            }
        }

        let rebuilt = self.build_snapshot().await?;
        let ids = rebuilt.incoming.get(doc_id).cloned().unwrap_or_default();
        *self.snapshot.write().await = Some(rebuilt);
        Ok(ids)
    }

    async fn build_snapshot(&self) -> Result<ReverseSnapshot> {
        let index = self.store.identifier_index().await?;
        let edges = self.store.citation_edges().await?;

        let mut by_identifier: HashMap<String, String> = HashMap::new();
        for entry in index {
            by_identifier.insert(entry.identifier, entry.doc_id);
        }

        let mut incoming: HashMap<String, Vec<String>> = HashMap::new();
        for (source, citation) in edges {
            if let Some(cited) = by_identifier.get(&citation) {
                incoming.entry(cited.clone()).or_default().push(source);
            }
        }
        for citing in incoming.values_mut() {
            citing.sort();
            citing.dedup();
        }

        Ok(ReverseSnapshot {
            built_at: Instant::now(),
            incoming,
        })
    }

    async fn live_incoming(&self, doc_id: &str) -> Result<Vec<String>> {
        let Some(doc) = self.store.get_document(doc_id).await? else {
            return Ok(Vec::new());
        };
        let mut identifiers = vec![doc.primary_identifier];
        identifiers.extend(doc.alternate_identifiers);
        self.store.citing_doc_ids(&identifiers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocType, Document};
    use crate::store::memory::MemoryStore;

    fn doc(id: &str, primary: &str) -> Document {
        Document {
            id: id.to_string(),
            doc_type: DocType::Case,
            title: format!("Case {id}"),
            primary_identifier: primary.to_string(),
            alternate_identifiers: Vec::new(),
            jurisdiction: None,
            date: None,
            raw_text: "text".to_string(),
            metadata_json: "{}".to_string(),
        }
    }

    fn mention(source: &str, citation: &str) -> CitationMention {
        CitationMention {
            source_doc_id: source.to_string(),
            citation: citation.to_string(),
            case_name: None,
            resolved_doc_id: None,
            is_in_corpus: false,
        }
    }

    async fn graph_with_corpus() -> (Arc<MemoryStore>, CitationGraph) {
        let store = Arc::new(MemoryStore::new());
        let mut cited = doc("cited", "[2021] HKCFA 5");
        cited
            .alternate_identifiers
            .push("[2021] 2 HKLRD 100".to_string());
        store.upsert_document(&cited).await.unwrap();
        store
            .upsert_document(&doc("citing", "[2022] HKCFI 9"))
            .await
            .unwrap();
        let graph = CitationGraph::new(store.clone(), Duration::from_secs(300));
        (store, graph)
    }

    #[tokio::test]
    async fn test_resolves_against_alternate_identifier() {
        let (_store, graph) = graph_with_corpus().await;
        let resolved = graph
            .resolve_mentions(vec![
                mention("citing", "[2021] 2 HKLRD 100"),
                mention("citing", "[1999] UKHL 1"),
            ])
            .await
            .unwrap();

        assert_eq!(resolved.len(), 2);
        assert!(resolved[0].is_in_corpus);
        assert_eq!(resolved[0].resolved_doc_id.as_deref(), Some("cited"));
        // Unresolved mention stays visible.
        assert!(!resolved[1].is_in_corpus);
        assert!(resolved[1].resolved_doc_id.is_none());
    }

    #[tokio::test]
    async fn test_self_citation_dropped() {
        let (_store, graph) = graph_with_corpus().await;
        let resolved = graph
            .resolve_mentions(vec![mention("cited", "[2021] HKCFA 5")])
            .await
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn test_incoming_via_any_identifier_deduplicated() {
        let (store, graph) = graph_with_corpus().await;
        // One citing doc mentions both the neutral and the report form.
        store
            .replace_mentions(
                "citing",
                &[
                    mention("citing", "[2021] HKCFA 5"),
                    mention("citing", "[2021] 2 HKLRD 100"),
                ],
            )
            .await
            .unwrap();

        let incoming = graph.incoming("cited").await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].doc_id, "citing");
        assert_eq!(incoming[0].primary_identifier, "[2022] HKCFI 9");
    }

    #[tokio::test]
    async fn test_snapshot_serves_stale_until_invalidated() {
        let (store, graph) = graph_with_corpus().await;
        store
            .replace_mentions("citing", &[mention("citing", "[2021] HKCFA 5")])
            .await
            .unwrap();

        assert_eq!(graph.incoming("cited").await.unwrap().len(), 1);

        // New edges appear only after the snapshot is refreshed.
        store
            .upsert_document(&doc("late", "[2023] HKCA 1"))
            .await
            .unwrap();
        store
            .replace_mentions("late", &[mention("late", "[2021] HKCFA 5")])
            .await
            .unwrap();
        assert_eq!(graph.incoming("cited").await.unwrap().len(), 1);

        graph.invalidate_snapshot().await;
        assert_eq!(graph.incoming("cited").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_outgoing_enriched_with_metadata() {
        let (store, graph) = graph_with_corpus().await;
        let resolved = graph
            .resolve_mentions(vec![
                mention("citing", "[2021] HKCFA 5"),
                mention("citing", "[1999] UKHL 1"),
            ])
            .await
            .unwrap();
        store.replace_mentions("citing", &resolved).await.unwrap();

        let outgoing = graph.outgoing("citing").await.unwrap();
        assert_eq!(outgoing.len(), 2);
        let hit = outgoing
            .iter()
            .find(|o| o.citation == "[2021] HKCFA 5")
            .unwrap();
        assert!(hit.is_in_corpus);
        assert_eq!(hit.cited.as_ref().unwrap().title, "Case cited");
        let miss = outgoing
            .iter()
            .find(|o| o.citation == "[1999] UKHL 1")
            .unwrap();
        assert!(!miss.is_in_corpus);
        assert!(miss.cited.is_none());
    }
}
