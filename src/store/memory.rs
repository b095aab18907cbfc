//! In-memory [`Store`] used by tests and ephemeral runs.
//!
//! Vector search is a brute-force cosine scan and lexical search a naive
//! term-count over raw text. Both are exact, which makes this store the
//! reference implementation the SQLite store's behavior is checked
//! against.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::embedding::{cosine_distance, EmbeddingBackend};
use crate::models::{
    Chunk, ChunkType, CitationMention, Document, DocumentMetadata, RetrievalFilters,
};
use crate::store::{
    check_dimensions, metadata_passes, EmbeddingRecord, IdentifierEntry, LexicalHit, Store,
    VectorHit,
};

#[derive(Debug, Clone)]
struct StoredEmbedding {
    doc_id: String,
    vector: Vec<f32>,
    text: Option<String>,
    chunk_type: ChunkType,
    /// Hash of the text the vector was computed from, for staleness checks.
    text_hash: Option<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<HashMap<String, Vec<Chunk>>>,
    embeddings: RwLock<HashMap<(String, EmbeddingBackend), StoredEmbedding>>,
    mentions: RwLock<HashMap<String, Vec<CitationMention>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn text_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn metadata_of(doc: &Document) -> DocumentMetadata {
    DocumentMetadata {
        id: doc.id.clone(),
        doc_type: doc.doc_type,
        title: doc.title.clone(),
        primary_identifier: doc.primary_identifier.clone(),
        jurisdiction: doc.jurisdiction.clone(),
        date: doc.date,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        self.docs
            .write()
            .unwrap()
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().unwrap().get(id).cloned())
    }

    async fn get_document_metadata(&self, id: &str) -> Result<Option<DocumentMetadata>> {
        Ok(self.docs.read().unwrap().get(id).map(metadata_of))
    }

    async fn add_alternate_identifiers(&self, doc_id: &str, identifiers: &[String]) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        if let Some(doc) = docs.get_mut(doc_id) {
            for id in identifiers {
                if *id != doc.primary_identifier && !doc.alternate_identifiers.contains(id) {
                    doc.alternate_identifiers.push(id.clone());
                }
            }
        }
        Ok(())
    }

    async fn replace_chunks(&self, doc_id: &str, chunks: &[Chunk]) -> Result<()> {
        // Old generation goes as a whole: chunks and their embeddings for
        // every backend.
        self.embeddings
            .write()
            .unwrap()
            .retain(|_, stored| stored.doc_id != doc_id);
        self.chunks
            .write()
            .unwrap()
            .insert(doc_id.to_string(), chunks.to_vec());
        Ok(())
    }

    async fn upsert_embeddings(
        &self,
        doc_id: &str,
        backend: EmbeddingBackend,
        records: &[EmbeddingRecord],
    ) -> Result<()> {
        check_dimensions(backend, records)?;
        let mut embeddings = self.embeddings.write().unwrap();
        for record in records {
            embeddings.insert(
                (record.chunk_id.clone(), backend),
                StoredEmbedding {
                    doc_id: doc_id.to_string(),
                    vector: record.vector.clone(),
                    text: record.text.clone(),
                    chunk_type: record.effective_chunk_type(),
                    text_hash: record.text.as_deref().map(text_hash),
                },
            );
        }
        Ok(())
    }

    async fn pending_chunks(&self, backend: EmbeddingBackend) -> Result<Vec<Chunk>> {
        let chunks = self.chunks.read().unwrap();
        let embeddings = self.embeddings.read().unwrap();

        let mut pending: Vec<Chunk> = Vec::new();
        for doc_chunks in chunks.values() {
            for chunk in doc_chunks {
                let fresh = embeddings
                    .get(&(chunk.id.clone(), backend))
                    .map(|stored| stored.text_hash.as_deref() == Some(chunk.hash.as_str()))
                    .unwrap_or(false);
                if !fresh {
                    pending.push(chunk.clone());
                }
            }
        }
        pending.sort_by(|a, b| (&a.doc_id, a.chunk_index).cmp(&(&b.doc_id, b.chunk_index)));
        Ok(pending)
    }

    async fn clear_embeddings(&self, backend: EmbeddingBackend) -> Result<()> {
        self.embeddings
            .write()
            .unwrap()
            .retain(|(_, b), _| *b != backend);
        Ok(())
    }

    async fn embedding_count(&self, backend: EmbeddingBackend) -> Result<u64> {
        Ok(self
            .embeddings
            .read()
            .unwrap()
            .keys()
            .filter(|(_, b)| *b == backend)
            .count() as u64)
    }

    async fn vector_search(
        &self,
        backend: EmbeddingBackend,
        query_vec: &[f32],
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<VectorHit>> {
        let docs = self.docs.read().unwrap();
        let embeddings = self.embeddings.read().unwrap();

        let mut hits: Vec<VectorHit> = embeddings
            .iter()
            .filter(|((_, b), _)| *b == backend)
            .filter(|(_, stored)| {
                docs.get(&stored.doc_id)
                    .map(|doc| metadata_passes(&metadata_of(doc), filters))
                    .unwrap_or(false)
            })
            .map(|((chunk_id, _), stored)| VectorHit {
                chunk_id: chunk_id.clone(),
                doc_id: stored.doc_id.clone(),
                distance: cosine_distance(query_vec, &stored.vector),
                text: stored.text.clone().unwrap_or_default(),
                chunk_type: stored.chunk_type,
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn lexical_search(
        &self,
        query: &str,
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<LexicalHit>> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let docs = self.docs.read().unwrap();
        let mut hits: Vec<LexicalHit> = Vec::new();

        for doc in docs.values() {
            if !metadata_passes(&metadata_of(doc), filters) {
                continue;
            }
            let lower = doc.raw_text.to_lowercase();
            let score: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
            if score == 0 {
                continue;
            }
            let snippet_at = terms
                .iter()
                .filter_map(|t| lower.find(t.as_str()))
                .min()
                .unwrap_or(0);
            hits.push(LexicalHit {
                doc_id: doc.id.clone(),
                raw_score: score as f64,
                snippet: snippet_around(&doc.raw_text, snippet_at),
            });
        }

        hits.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn replace_mentions(&self, doc_id: &str, mentions: &[CitationMention]) -> Result<()> {
        self.mentions
            .write()
            .unwrap()
            .insert(doc_id.to_string(), mentions.to_vec());
        Ok(())
    }

    async fn outgoing_mentions(&self, doc_id: &str) -> Result<Vec<CitationMention>> {
        Ok(self
            .mentions
            .read()
            .unwrap()
            .get(doc_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn identifier_index(&self) -> Result<Vec<IdentifierEntry>> {
        let docs = self.docs.read().unwrap();
        let mut entries: Vec<IdentifierEntry> = Vec::new();
        for doc in docs.values() {
            entries.push(IdentifierEntry {
                doc_id: doc.id.clone(),
                identifier: doc.primary_identifier.clone(),
            });
            for alt in &doc.alternate_identifiers {
                entries.push(IdentifierEntry {
                    doc_id: doc.id.clone(),
                    identifier: alt.clone(),
                });
            }
        }
        entries.sort_by(|a, b| (&a.doc_id, &a.identifier).cmp(&(&b.doc_id, &b.identifier)));
        Ok(entries)
    }

    async fn citing_doc_ids(&self, identifiers: &[String]) -> Result<Vec<String>> {
        let mentions = self.mentions.read().unwrap();
        let mut ids: Vec<String> = mentions
            .iter()
            .filter(|(_, doc_mentions)| {
                doc_mentions
                    .iter()
                    .any(|m| identifiers.contains(&m.citation))
            })
            .map(|(doc_id, _)| doc_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn citation_edges(&self) -> Result<Vec<(String, String)>> {
        let mentions = self.mentions.read().unwrap();
        let mut edges: Vec<(String, String)> = mentions
            .iter()
            .flat_map(|(doc_id, doc_mentions)| {
                doc_mentions
                    .iter()
                    .map(|m| (doc_id.clone(), m.citation.clone()))
            })
            .collect();
        edges.sort();
        Ok(edges)
    }
}

/// Up to 200 characters of context starting at the first matching term.
fn snippet_around(text: &str, at: usize) -> String {
    let start = {
        let mut i = at.min(text.len());
        while i > 0 && !text.is_char_boundary(i) {
            i -= 1;
        }
        i
    };
    let mut end = (start + 200).min(text.len());
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{chunk, ChunkOptions};
    use crate::models::DocType;

    fn doc(id: &str, primary: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            doc_type: DocType::Case,
            title: format!("Case {id}"),
            primary_identifier: primary.to_string(),
            alternate_identifiers: Vec::new(),
            jurisdiction: Some("HK".to_string()),
            date: None,
            raw_text: text.to_string(),
            metadata_json: "{}".to_string(),
        }
    }

    fn chunks_for(d: &Document) -> Vec<Chunk> {
        chunk(&d.id, d.doc_type, &d.raw_text, &ChunkOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_embeddings_idempotent() {
        let store = MemoryStore::new();
        let d = doc("d1", "[2020] HKCFI 1", "[1] Some judgment text here.");
        store.upsert_document(&d).await.unwrap();
        let chunks = chunks_for(&d);
        store.replace_chunks("d1", &chunks).await.unwrap();

        let records: Vec<EmbeddingRecord> = chunks
            .iter()
            .map(|c| EmbeddingRecord::from_chunk(c, vec![0.25f32; 1024]))
            .collect();
        store
            .upsert_embeddings("d1", EmbeddingBackend::Titan, &records)
            .await
            .unwrap();
        store
            .upsert_embeddings("d1", EmbeddingBackend::Titan, &records)
            .await
            .unwrap();

        assert_eq!(
            store.embedding_count(EmbeddingBackend::Titan).await.unwrap(),
            chunks.len() as u64
        );
    }

    #[tokio::test]
    async fn test_upsert_embeddings_rejects_wrong_dimension() {
        let store = MemoryStore::new();
        let d = doc("d1", "[2020] HKCFI 1", "[1] Text.");
        store.upsert_document(&d).await.unwrap();
        let chunks = chunks_for(&d);
        store.replace_chunks("d1", &chunks).await.unwrap();

        let records = vec![EmbeddingRecord::from_chunk(&chunks[0], vec![0.5f32; 7])];
        assert!(store
            .upsert_embeddings("d1", EmbeddingBackend::Titan, &records)
            .await
            .is_err());
        assert_eq!(store.embedding_count(EmbeddingBackend::Titan).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_chunks_drops_embeddings_for_all_backends() {
        let store = MemoryStore::new();
        let d = doc("d1", "[2020] HKCFI 1", "[1] Original text.");
        store.upsert_document(&d).await.unwrap();
        let chunks = chunks_for(&d);
        store.replace_chunks("d1", &chunks).await.unwrap();

        for backend in EmbeddingBackend::ALL {
            let records: Vec<EmbeddingRecord> = chunks
                .iter()
                .map(|c| EmbeddingRecord::from_chunk(c, vec![0.5f32; backend.dimension()]))
                .collect();
            store
                .upsert_embeddings("d1", backend, &records)
                .await
                .unwrap();
        }

        store.replace_chunks("d1", &chunks).await.unwrap();
        for backend in EmbeddingBackend::ALL {
            assert_eq!(store.embedding_count(backend).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_pending_chunks_tracks_staleness() {
        let store = MemoryStore::new();
        let d = doc("d1", "[2020] HKCFI 1", "[1] First.\n\n[2] Second.");
        store.upsert_document(&d).await.unwrap();
        let chunks = chunks_for(&d);
        store.replace_chunks("d1", &chunks).await.unwrap();

        assert_eq!(
            store
                .pending_chunks(EmbeddingBackend::Titan)
                .await
                .unwrap()
                .len(),
            chunks.len()
        );

        let records: Vec<EmbeddingRecord> = chunks
            .iter()
            .map(|c| EmbeddingRecord::from_chunk(c, vec![0.1f32; 1024]))
            .collect();
        store
            .upsert_embeddings("d1", EmbeddingBackend::Titan, &records)
            .await
            .unwrap();
        assert!(store
            .pending_chunks(EmbeddingBackend::Titan)
            .await
            .unwrap()
            .is_empty());
        // The other backend is still entirely pending.
        assert_eq!(
            store
                .pending_chunks(EmbeddingBackend::OpenAi)
                .await
                .unwrap()
                .len(),
            chunks.len()
        );
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_distance_and_filters() {
        let store = MemoryStore::new();
        let mut near_doc = doc("near", "[2020] HKCFI 1", "[1] text");
        near_doc.jurisdiction = Some("HK".to_string());
        let mut far_doc = doc("far", "[2020] HKCA 2", "[1] text");
        far_doc.jurisdiction = Some("UK".to_string());
        store.upsert_document(&near_doc).await.unwrap();
        store.upsert_document(&far_doc).await.unwrap();

        let near_chunks = chunks_for(&near_doc);
        let far_chunks = chunks_for(&far_doc);
        store.replace_chunks("near", &near_chunks).await.unwrap();
        store.replace_chunks("far", &far_chunks).await.unwrap();

        let mut near_vec = vec![0.0f32; 1024];
        near_vec[0] = 1.0;
        let mut far_vec = vec![0.0f32; 1024];
        far_vec[1] = 1.0;
        store
            .upsert_embeddings(
                "near",
                EmbeddingBackend::Titan,
                &[EmbeddingRecord::from_chunk(&near_chunks[0], near_vec.clone())],
            )
            .await
            .unwrap();
        store
            .upsert_embeddings(
                "far",
                EmbeddingBackend::Titan,
                &[EmbeddingRecord::from_chunk(&far_chunks[0], far_vec)],
            )
            .await
            .unwrap();

        let hits = store
            .vector_search(
                EmbeddingBackend::Titan,
                &near_vec,
                10,
                &RetrievalFilters::default(),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc_id, "near");
        assert!(hits[0].distance < hits[1].distance);

        let filters = RetrievalFilters {
            jurisdiction: Some("UK".to_string()),
            ..Default::default()
        };
        let hits = store
            .vector_search(EmbeddingBackend::Titan, &near_vec, 10, &filters)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "far");
    }

    #[tokio::test]
    async fn test_lexical_search_scores_term_frequency() {
        let store = MemoryStore::new();
        store
            .upsert_document(&doc(
                "a",
                "[2020] HKCFI 1",
                "negligence negligence negligence and duty",
            ))
            .await
            .unwrap();
        store
            .upsert_document(&doc("b", "[2020] HKCA 2", "a single mention of negligence"))
            .await
            .unwrap();
        store
            .upsert_document(&doc("c", "[2020] HKDC 3", "contract law only"))
            .await
            .unwrap();

        let hits = store
            .lexical_search("negligence", 10, &RetrievalFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc_id, "a");
        assert!(hits[0].raw_score > hits[1].raw_score);
        assert!(hits[0].snippet.contains("negligence"));
    }

    #[tokio::test]
    async fn test_identifier_index_and_citing_docs() {
        let store = MemoryStore::new();
        let mut d1 = doc("d1", "[2021] HKCFA 5", "text");
        d1.alternate_identifiers.push("[2021] 2 HKLRD 100".to_string());
        store.upsert_document(&d1).await.unwrap();

        let entries = store.identifier_index().await.unwrap();
        assert_eq!(entries.len(), 2);

        store
            .replace_mentions(
                "d2",
                &[CitationMention {
                    source_doc_id: "d2".to_string(),
                    citation: "[2021] 2 HKLRD 100".to_string(),
                    case_name: None,
                    resolved_doc_id: None,
                    is_in_corpus: false,
                }],
            )
            .await
            .unwrap();

        let citing = store
            .citing_doc_ids(&[
                "[2021] HKCFA 5".to_string(),
                "[2021] 2 HKLRD 100".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(citing, vec!["d2".to_string()]);
    }

    #[tokio::test]
    async fn test_add_alternate_identifiers_merges_without_duplicates() {
        let store = MemoryStore::new();
        let d = doc("d1", "[2021] HKCFA 5", "text");
        store.upsert_document(&d).await.unwrap();

        store
            .add_alternate_identifiers(
                "d1",
                &[
                    "[2021] 2 HKLRD 100".to_string(),
                    "[2021] HKCFA 5".to_string(),
                    "[2021] 2 HKLRD 100".to_string(),
                ],
            )
            .await
            .unwrap();

        let stored = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(stored.alternate_identifiers, vec!["[2021] 2 HKLRD 100"]);
    }
}
