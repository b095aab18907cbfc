//! Ingestion pipeline: JSONL document source → chunks → citation
//! mentions → embeddings.
//!
//! Each document is processed independently; a failure is recorded in the
//! [`IngestLedger`] and the run continues. After the whole file is
//! processed, a second resolution pass re-joins every document's mentions
//! against the now-complete identifier index, so forward references
//! within one file still resolve.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chunker::{self, ChunkOptions};
use crate::citations::CitationRegistry;
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingGateway;
use crate::graph::CitationGraph;
use crate::models::{DocType, Document};
use crate::store::{EmbeddingRecord, Store};

/// One line of the JSONL document source.
#[derive(Debug, Deserialize)]
pub struct IngestRecord {
    pub id: String,
    pub doc_type: DocType,
    pub title: String,
    pub primary_identifier: String,
    #[serde(default)]
    pub alternate_identifiers: Vec<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub text: String,
    /// Structural path for statute sections, e.g. `"Part 3 > s.4 > (2)"`.
    #[serde(default)]
    pub section_path: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Outcome bookkeeping for one pipeline run.
#[derive(Debug, Default)]
pub struct IngestLedger {
    pub processed: usize,
    pub failed: usize,
    /// `(item, error)` for each failure, in input order.
    pub errors: Vec<(String, String)>,
}

impl IngestLedger {
    fn record_failure(&mut self, item: &str, error: &anyhow::Error) {
        warn!(item, error = %error, "pipeline item failed");
        self.failed += 1;
        self.errors.push((item.to_string(), format!("{error:#}")));
    }
}

pub struct IngestPipeline {
    store: Arc<dyn Store>,
    registry: CitationRegistry,
    graph: Arc<CitationGraph>,
    gateway: Option<Arc<EmbeddingGateway>>,
    chunking: ChunkingConfig,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        registry: CitationRegistry,
        graph: Arc<CitationGraph>,
        gateway: Option<Arc<EmbeddingGateway>>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            registry,
            graph,
            gateway,
            chunking,
        }
    }

    /// Ingest every record of a JSONL file, then re-resolve mentions
    /// corpus-wide.
    pub async fn run_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<IngestLedger> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document source: {}", path.display()))?;

        let mut ledger = IngestLedger::default();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                anyhow::bail!("ingestion cancelled at line {}", line_no + 1);
            }

            let record: IngestRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    ledger.record_failure(&format!("line {}", line_no + 1), &e.into());
                    continue;
                }
            };
            let id = record.id.clone();
            match self.ingest_document(record, cancel).await {
                Ok(()) => ledger.processed += 1,
                Err(e) => ledger.record_failure(&id, &e),
            }
        }

        self.refresh_resolution().await?;
        self.graph.invalidate_snapshot().await;

        info!(
            processed = ledger.processed,
            failed = ledger.failed,
            "ingestion run complete"
        );
        Ok(ledger)
    }

    /// Ingest a single document: upsert, chunk, extract and resolve
    /// citations, and (when a backend is configured) embed.
    pub async fn ingest_document(
        &self,
        record: IngestRecord,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let doc = Document {
            id: record.id.clone(),
            doc_type: record.doc_type,
            title: record.title,
            primary_identifier: self.registry.normalize(&record.primary_identifier),
            alternate_identifiers: record
                .alternate_identifiers
                .iter()
                .map(|a| self.registry.normalize(a))
                .collect(),
            jurisdiction: record.jurisdiction,
            date: record.date,
            raw_text: record.text,
            metadata_json: record
                .metadata
                .map(|m| m.to_string())
                .unwrap_or_else(|| "{}".to_string()),
        };
        self.store.upsert_document(&doc).await?;

        let options = ChunkOptions {
            max_chars: self.chunking.max_chars,
            overlap_paragraphs: self.chunking.overlap_paragraphs,
            section_path: record.section_path,
        };
        let chunks = chunker::chunk(&doc.id, doc.doc_type, &doc.raw_text, &options)?;
        self.store.replace_chunks(&doc.id, &chunks).await?;

        let extraction = self.registry.extract(&doc.id, &doc.raw_text);
        if !extraction.header_identifiers.is_empty() {
            self.store
                .add_alternate_identifiers(&doc.id, &extraction.header_identifiers)
                .await?;
        }
        let mentions = self.graph.resolve_mentions(extraction.outgoing).await?;
        self.store.replace_mentions(&doc.id, &mentions).await?;

        if let Some(gateway) = &self.gateway {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = gateway.embed(&texts, cancel).await?;
            let records: Vec<EmbeddingRecord> = chunks
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddingRecord::from_chunk(chunk, vector))
                .collect();
            self.store
                .upsert_embeddings(&doc.id, gateway.backend(), &records)
                .await?;
        }

        Ok(())
    }

    /// Backfill embeddings for chunks with no vector for the configured
    /// backend, or whose text hash changed since embedding. Resumable:
    /// re-running skips up-to-date chunks.
    pub async fn embed_pending(&self, cancel: &CancellationToken) -> Result<IngestLedger> {
        let gateway = self
            .gateway
            .as_ref()
            .context("no embedding backend configured")?;

        let pending = self.store.pending_chunks(gateway.backend()).await?;
        info!(
            backend = gateway.backend().name(),
            pending = pending.len(),
            "embedding backfill starting"
        );

        let mut ledger = IngestLedger::default();
        let mut by_doc: Vec<(String, Vec<crate::models::Chunk>)> = Vec::new();
        for chunk in pending {
            match by_doc.last_mut() {
                Some((doc_id, chunks)) if *doc_id == chunk.doc_id => chunks.push(chunk),
                _ => by_doc.push((chunk.doc_id.clone(), vec![chunk])),
            }
        }

        for (doc_id, chunks) in by_doc {
            if cancel.is_cancelled() {
                break;
            }
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            match gateway.embed(&texts, cancel).await {
                Ok(vectors) => {
                    let records: Vec<EmbeddingRecord> = chunks
                        .iter()
                        .zip(vectors)
                        .map(|(chunk, vector)| EmbeddingRecord::from_chunk(chunk, vector))
                        .collect();
                    match self
                        .store
                        .upsert_embeddings(&doc_id, gateway.backend(), &records)
                        .await
                    {
                        Ok(()) => ledger.processed += records.len(),
                        Err(e) => ledger.record_failure(&doc_id, &e),
                    }
                }
                Err(e) => ledger.record_failure(&doc_id, &e.into()),
            }
        }

        info!(
            processed = ledger.processed,
            failed = ledger.failed,
            "embedding backfill complete"
        );
        Ok(ledger)
    }

    /// Re-resolve every document's stored mentions against the current
    /// identifier index.
    pub async fn refresh_resolution(&self) -> Result<()> {
        let mut source_ids: Vec<String> = self
            .store
            .citation_edges()
            .await?
            .into_iter()
            .map(|(source, _)| source)
            .collect();
        source_ids.sort();
        source_ids.dedup();

        for doc_id in source_ids {
            let mentions = self.store.outgoing_mentions(&doc_id).await?;
            let resolved = self.graph.resolve_mentions(mentions).await?;
            self.store.replace_mentions(&doc_id, &resolved).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CitationsConfig;
    use crate::embedding::{EmbeddingBackend, MockProvider};
    use crate::store::memory::MemoryStore;
    use std::io::Write;
    use std::time::Duration;

    fn pipeline(store: Arc<MemoryStore>, with_gateway: bool) -> IngestPipeline {
        let registry = CitationRegistry::new(&CitationsConfig::default()).unwrap();
        let graph = Arc::new(CitationGraph::new(store.clone(), Duration::from_secs(300)));
        let gateway = with_gateway.then(|| {
            Arc::new(EmbeddingGateway::new(
                Arc::new(MockProvider::new(EmbeddingBackend::Titan)),
                EmbeddingBackend::Titan,
                8,
                2,
            ))
        });
        IngestPipeline::new(store, registry, graph, gateway, ChunkingConfig::default())
    }

    fn record_json(id: &str, primary: &str, text: &str) -> String {
        serde_json::json!({
            "id": id,
            "doc_type": "case",
            "title": format!("Case {id}"),
            "primary_identifier": primary,
            "text": text,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_run_file_continues_past_bad_lines() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone(), false);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "{}", record_json("d1", "[2020] HKCFI 1", "[1] Text one.")).unwrap();
        writeln!(f, "this is not json").unwrap();
        writeln!(f, "{}", record_json("d2", "[2020] HKCFI 2", "[1] Text two.")).unwrap();

        let ledger = p.run_file(&path, &CancellationToken::new()).await.unwrap();
        assert_eq!(ledger.processed, 2);
        assert_eq!(ledger.failed, 1);
        assert!(store.get_document("d2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_forward_references_resolve_after_full_run() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone(), false);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        // d1 cites d2, which only appears later in the file.
        writeln!(
            f,
            "{}",
            record_json(
                "d1",
                "[2022] HKCFI 1",
                "[1] As held in [2020] HKCA 9, the point is settled."
            )
        )
        .unwrap();
        writeln!(f, "{}", record_json("d2", "[2020] HKCA 9", "[1] Earlier case.")).unwrap();

        p.run_file(&path, &CancellationToken::new()).await.unwrap();

        let mentions = store.outgoing_mentions("d1").await.unwrap();
        assert_eq!(mentions.len(), 1);
        assert!(mentions[0].is_in_corpus);
        assert_eq!(mentions[0].resolved_doc_id.as_deref(), Some("d2"));
    }

    #[tokio::test]
    async fn test_identifiers_normalized_on_ingest() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone(), false);

        let record: IngestRecord = serde_json::from_str(&record_json(
            "d1",
            "[2020]   hkcfi   1",
            "[1] Text.",
        ))
        .unwrap();
        p.ingest_document(record, &CancellationToken::new())
            .await
            .unwrap();

        let doc = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(doc.primary_identifier, "[2020] HKCFI 1");
    }

    #[tokio::test]
    async fn test_ingest_embeds_when_backend_configured() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone(), true);

        let record: IngestRecord =
            serde_json::from_str(&record_json("d1", "[2020] HKCFI 1", "[1] Some text."))
                .unwrap();
        p.ingest_document(record, &CancellationToken::new())
            .await
            .unwrap();

        assert!(store.embedding_count(EmbeddingBackend::Titan).await.unwrap() > 0);
        assert!(p
            .embed_pending(&CancellationToken::new())
            .await
            .unwrap()
            .processed
            == 0);
    }

    #[tokio::test]
    async fn test_embed_pending_backfills_and_is_resumable() {
        let store = Arc::new(MemoryStore::new());
        // Ingest without a backend, then backfill with one.
        let no_embed = pipeline(store.clone(), false);
        let record: IngestRecord = serde_json::from_str(&record_json(
            "d1",
            "[2020] HKCFI 1",
            "[1] First.\n\n[2] Second.",
        ))
        .unwrap();
        no_embed
            .ingest_document(record, &CancellationToken::new())
            .await
            .unwrap();

        let with_embed = pipeline(store.clone(), true);
        let first = with_embed
            .embed_pending(&CancellationToken::new())
            .await
            .unwrap();
        assert!(first.processed > 0);
        assert_eq!(first.failed, 0);

        let second = with_embed
            .embed_pending(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.processed, 0);
    }
}
