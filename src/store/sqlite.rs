//! SQLite-backed [`Store`].
//!
//! Vectors live as little-endian f32 BLOBs and are ranked with an exact
//! cosine scan in Rust after the metadata filters are pushed down in SQL.
//! The lexical phase runs over an FTS5 table of document full text, ranked
//! by bm25. All multi-row writes go through a transaction so a chunk
//! generation, its embeddings, and its lexical entry swap atomically.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob, EmbeddingBackend};
use crate::models::{
    Chunk, ChunkType, CitationMention, DocType, Document, DocumentMetadata, RetrievalFilters,
};
use crate::store::{
    check_dimensions, EmbeddingRecord, IdentifierEntry, LexicalHit, Store, VectorHit,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// Metadata filters, shared by both candidate phases. `d` is the documents
// table alias; binds 2..=5 are doc_type, jurisdiction, date_from, date_to.
const FILTER_SQL: &str = "(?2 IS NULL OR d.doc_type = ?2) \
     AND (?3 IS NULL OR d.jurisdiction = ?3) \
     AND (?4 IS NULL OR (d.date IS NOT NULL AND d.date >= ?4)) \
     AND (?5 IS NULL OR (d.date IS NOT NULL AND d.date <= ?5))";

struct FilterBinds {
    doc_type: Option<String>,
    jurisdiction: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
}

impl FilterBinds {
    fn from(filters: &RetrievalFilters) -> Self {
        Self {
            doc_type: filters.doc_type.map(|t| t.as_str().to_string()),
            jurisdiction: filters.jurisdiction.clone(),
            date_from: filters.date_from.map(|d| d.to_string()),
            date_to: filters.date_to.map(|d| d.to_string()),
        }
    }
}

fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn text_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Quote each whitespace token so user text cannot inject FTS5 syntax;
/// tokens are OR-ed because lexical relevance is a union over terms.
fn fts_match_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow, alternates: Vec<String>) -> Document {
    Document {
        id: row.get("id"),
        doc_type: DocType::parse(row.get::<String, _>("doc_type").as_str())
            .unwrap_or(DocType::Case),
        title: row.get("title"),
        primary_identifier: row.get("primary_identifier"),
        alternate_identifiers: alternates,
        jurisdiction: row.get("jurisdiction"),
        date: parse_date(row.get("date")),
        raw_text: row.get("raw_text"),
        metadata_json: row.get("metadata_json"),
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let paragraph_numbers: Option<Vec<u32>> = row
        .get::<Option<String>, _>("paragraph_numbers")
        .and_then(|json| serde_json::from_str(&json).ok());
    Chunk {
        id: row.get("id"),
        doc_id: row.get("doc_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        chunk_type: ChunkType::parse(row.get::<String, _>("chunk_type").as_str()),
        paragraph_numbers,
        section_path: row.get("section_path"),
        hash: row.get("hash"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, doc_type, title, primary_identifier, jurisdiction, date, raw_text, metadata_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                doc_type = excluded.doc_type,
                title = excluded.title,
                primary_identifier = excluded.primary_identifier,
                jurisdiction = excluded.jurisdiction,
                date = excluded.date,
                raw_text = excluded.raw_text,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&doc.id)
        .bind(doc.doc_type.as_str())
        .bind(&doc.title)
        .bind(&doc.primary_identifier)
        .bind(&doc.jurisdiction)
        .bind(doc.date.map(|d| d.to_string()))
        .bind(&doc.raw_text)
        .bind(&doc.metadata_json)
        .execute(&mut *tx)
        .await?;

        for alt in &doc.alternate_identifiers {
            sqlx::query(
                "INSERT OR IGNORE INTO alternate_identifiers (doc_id, identifier) VALUES (?1, ?2)",
            )
            .bind(&doc.id)
            .bind(alt)
            .execute(&mut *tx)
            .await?;
        }

        // Refresh the lexical entry alongside the row.
        sqlx::query("DELETE FROM docs_fts WHERE doc_id = ?1")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO docs_fts (doc_id, text) VALUES (?1, ?2)")
            .bind(&doc.id)
            .bind(&doc.raw_text)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let alternates: Vec<String> = sqlx::query_scalar(
            "SELECT identifier FROM alternate_identifiers WHERE doc_id = ?1 ORDER BY identifier",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(row_to_document(&row, alternates)))
    }

    async fn get_document_metadata(&self, id: &str) -> Result<Option<DocumentMetadata>> {
        let row = sqlx::query(
            "SELECT id, doc_type, title, primary_identifier, jurisdiction, date FROM documents WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| DocumentMetadata {
            id: row.get("id"),
            doc_type: DocType::parse(row.get::<String, _>("doc_type").as_str())
                .unwrap_or(DocType::Case),
            title: row.get("title"),
            primary_identifier: row.get("primary_identifier"),
            jurisdiction: row.get("jurisdiction"),
            date: parse_date(row.get("date")),
        }))
    }

    async fn add_alternate_identifiers(&self, doc_id: &str, identifiers: &[String]) -> Result<()> {
        let primary: Option<String> =
            sqlx::query_scalar("SELECT primary_identifier FROM documents WHERE id = ?1")
                .bind(doc_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(primary) = primary else {
            return Ok(());
        };

        let mut tx = self.pool.begin().await?;
        for identifier in identifiers {
            if *identifier == primary {
                continue;
            }
            sqlx::query(
                "INSERT OR IGNORE INTO alternate_identifiers (doc_id, identifier) VALUES (?1, ?2)",
            )
            .bind(doc_id)
            .bind(identifier)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_chunks(&self, doc_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // The generation swaps as a whole: old chunks and every backend's
        // embeddings for them go together.
        sqlx::query("DELETE FROM embeddings WHERE doc_id = ?1")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE doc_id = ?1")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let paragraph_numbers = chunk
                .paragraph_numbers
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, doc_id, chunk_index, text, chunk_type, paragraph_numbers, section_path, hash)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.doc_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.chunk_type.as_str())
            .bind(paragraph_numbers)
            .bind(&chunk.section_path)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_embeddings(
        &self,
        doc_id: &str,
        backend: EmbeddingBackend,
        records: &[EmbeddingRecord],
    ) -> Result<()> {
        check_dimensions(backend, records)?;
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO embeddings (chunk_id, backend, doc_id, vector, text, chunk_type, text_hash)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(chunk_id, backend) DO UPDATE SET
                    doc_id = excluded.doc_id,
                    vector = excluded.vector,
                    text = excluded.text,
                    chunk_type = excluded.chunk_type,
                    text_hash = excluded.text_hash
                "#,
            )
            .bind(&record.chunk_id)
            .bind(backend.name())
            .bind(doc_id)
            .bind(vec_to_blob(&record.vector))
            .bind(&record.text)
            .bind(record.effective_chunk_type().as_str())
            .bind(record.text.as_deref().map(text_hash))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn pending_chunks(&self, backend: EmbeddingBackend) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.*
            FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.backend = ?1
            WHERE e.chunk_id IS NULL OR e.text_hash IS NULL OR e.text_hash != c.hash
            ORDER BY c.doc_id, c.chunk_index
            "#,
        )
        .bind(backend.name())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn clear_embeddings(&self, backend: EmbeddingBackend) -> Result<()> {
        sqlx::query("DELETE FROM embeddings WHERE backend = ?1")
            .bind(backend.name())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn embedding_count(&self, backend: EmbeddingBackend) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE backend = ?1")
            .bind(backend.name())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn vector_search(
        &self,
        backend: EmbeddingBackend,
        query_vec: &[f32],
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<VectorHit>> {
        let binds = FilterBinds::from(filters);
        let sql = format!(
            "SELECT e.chunk_id, e.doc_id, e.vector, e.text, e.chunk_type \
             FROM embeddings e JOIN documents d ON d.id = e.doc_id \
             WHERE e.backend = ?1 AND {FILTER_SQL}"
        );

        let rows = sqlx::query(&sql)
            .bind(backend.name())
            .bind(binds.doc_type)
            .bind(binds.jurisdiction)
            .bind(binds.date_from)
            .bind(binds.date_to)
            .fetch_all(&self.pool)
            .await?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| {
                let vector = blob_to_vec(row.get::<Vec<u8>, _>("vector").as_slice());
                VectorHit {
                    chunk_id: row.get("chunk_id"),
                    doc_id: row.get("doc_id"),
                    distance: cosine_distance(query_vec, &vector),
                    text: row.get::<Option<String>, _>("text").unwrap_or_default(),
                    chunk_type: ChunkType::parse(row.get::<String, _>("chunk_type").as_str()),
                }
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
        let match_query = fts_match_query(query);
        if match_query.is_empty() {
            return Ok(Vec::new());
        }

        let binds = FilterBinds::from(filters);
        // bm25 is smaller-is-better; negate so raw_score grows with
        // relevance.
        let sql = format!(
            "SELECT docs_fts.doc_id AS doc_id, -bm25(docs_fts) AS raw_score, \
                    snippet(docs_fts, 1, '', '', '…', 24) AS snip \
             FROM docs_fts JOIN documents d ON d.id = docs_fts.doc_id \
             WHERE docs_fts MATCH ?1 AND {FILTER_SQL} \
             ORDER BY raw_score DESC, docs_fts.doc_id \
             LIMIT ?6"
        );

        let rows = sqlx::query(&sql)
            .bind(&match_query)
            .bind(binds.doc_type)
            .bind(binds.jurisdiction)
            .bind(binds.date_from)
            .bind(binds.date_to)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| LexicalHit {
                doc_id: row.get("doc_id"),
                raw_score: row.get::<f64, _>("raw_score"),
                snippet: row.get("snip"),
            })
            .collect())
    }

    async fn replace_mentions(&self, doc_id: &str, mentions: &[CitationMention]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM mentions WHERE source_doc_id = ?1")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for mention in mentions {
            sqlx::query(
                r#"
                INSERT INTO mentions (source_doc_id, citation, case_name, resolved_doc_id, is_in_corpus)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(source_doc_id, citation) DO UPDATE SET
                    case_name = excluded.case_name,
                    resolved_doc_id = excluded.resolved_doc_id,
                    is_in_corpus = excluded.is_in_corpus
                "#,
            )
            .bind(doc_id)
            .bind(&mention.citation)
            .bind(&mention.case_name)
            .bind(&mention.resolved_doc_id)
            .bind(mention.is_in_corpus)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn outgoing_mentions(&self, doc_id: &str) -> Result<Vec<CitationMention>> {
        let rows = sqlx::query(
            "SELECT source_doc_id, citation, case_name, resolved_doc_id, is_in_corpus \
             FROM mentions WHERE source_doc_id = ?1 ORDER BY citation",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CitationMention {
                source_doc_id: row.get("source_doc_id"),
                citation: row.get("citation"),
                case_name: row.get("case_name"),
                resolved_doc_id: row.get("resolved_doc_id"),
                is_in_corpus: row.get("is_in_corpus"),
            })
            .collect())
    }

    async fn identifier_index(&self) -> Result<Vec<IdentifierEntry>> {
        let rows = sqlx::query(
            "SELECT id AS doc_id, primary_identifier AS identifier FROM documents \
             UNION ALL \
             SELECT doc_id, identifier FROM alternate_identifiers \
             ORDER BY doc_id, identifier",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| IdentifierEntry {
                doc_id: row.get("doc_id"),
                identifier: row.get("identifier"),
            })
            .collect())
    }

    async fn citing_doc_ids(&self, identifiers: &[String]) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        for identifier in identifiers {
            let mut rows: Vec<String> = sqlx::query_scalar(
                "SELECT DISTINCT source_doc_id FROM mentions WHERE citation = ?1",
            )
            .bind(identifier)
            .fetch_all(&self.pool)
            .await?;
            ids.append(&mut rows);
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn citation_edges(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT source_doc_id, citation FROM mentions ORDER BY source_doc_id, citation",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("source_doc_id"), row.get("citation")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{chunk, ChunkOptions};
    use crate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        // A second pass must be a no-op.
        migrate::run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn doc(id: &str, primary: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            doc_type: DocType::Case,
            title: format!("Case {id}"),
            primary_identifier: primary.to_string(),
            alternate_identifiers: Vec::new(),
            jurisdiction: Some("HK".to_string()),
            date: NaiveDate::from_ymd_opt(2020, 6, 1),
            raw_text: text.to_string(),
            metadata_json: "{}".to_string(),
        }
    }

    fn chunks_for(d: &Document) -> Vec<Chunk> {
        chunk(&d.id, d.doc_type, &d.raw_text, &ChunkOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_document_roundtrip_with_alternates() {
        let store = test_store().await;
        let mut d = doc("d1", "[2020] HKCFI 1", "[1] Judgment text.");
        d.alternate_identifiers.push("[2020] 1 HKLRD 9".to_string());
        store.upsert_document(&d).await.unwrap();
        store.upsert_document(&d).await.unwrap();

        let loaded = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(loaded.primary_identifier, "[2020] HKCFI 1");
        assert_eq!(loaded.alternate_identifiers, vec!["[2020] 1 HKLRD 9"]);
        assert_eq!(loaded.date, NaiveDate::from_ymd_opt(2020, 6, 1));

        let meta = store.get_document_metadata("d1").await.unwrap().unwrap();
        assert_eq!(meta.doc_type, DocType::Case);
    }

    #[tokio::test]
    async fn test_upsert_embeddings_idempotent_rows_and_vectors() {
        let store = test_store().await;
        let d = doc("d1", "[2020] HKCFI 1", "[1] Some text.\n\n[2] More text.");
        store.upsert_document(&d).await.unwrap();
        let chunks = chunks_for(&d);
        store.replace_chunks("d1", &chunks).await.unwrap();

        let records: Vec<EmbeddingRecord> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut v = vec![0.0f32; 1024];
                v[i] = 1.0;
                EmbeddingRecord::from_chunk(c, v)
            })
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

        let mut probe = vec![0.0f32; 1024];
        probe[0] = 1.0;
        let hits = store
            .vector_search(
                EmbeddingBackend::Titan,
                &probe,
                10,
                &RetrievalFilters::default(),
            )
            .await
            .unwrap();
        assert_eq!(hits[0].chunk_id, chunks[0].id);
        assert!(hits[0].distance < 1e-6);
    }

    #[tokio::test]
    async fn test_upsert_embeddings_rejects_wrong_dimension() {
        let store = test_store().await;
        let d = doc("d1", "[2020] HKCFI 1", "[1] Text.");
        store.upsert_document(&d).await.unwrap();
        let chunks = chunks_for(&d);
        store.replace_chunks("d1", &chunks).await.unwrap();

        let records = vec![EmbeddingRecord::from_chunk(&chunks[0], vec![0.5f32; 1536])];
        assert!(store
            .upsert_embeddings("d1", EmbeddingBackend::Titan, &records)
            .await
            .is_err());
        assert_eq!(store.embedding_count(EmbeddingBackend::Titan).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_chunks_cascades_embeddings() {
        let store = test_store().await;
        let d = doc("d1", "[2020] HKCFI 1", "[1] Text.");
        store.upsert_document(&d).await.unwrap();
        let chunks = chunks_for(&d);
        store.replace_chunks("d1", &chunks).await.unwrap();

        for backend in EmbeddingBackend::ALL {
            let records: Vec<EmbeddingRecord> = chunks
                .iter()
                .map(|c| EmbeddingRecord::from_chunk(c, vec![0.5f32; backend.dimension()]))
                .collect();
            store.upsert_embeddings("d1", backend, &records).await.unwrap();
        }

        store.replace_chunks("d1", &chunks).await.unwrap();
        for backend in EmbeddingBackend::ALL {
            assert_eq!(store.embedding_count(backend).await.unwrap(), 0);
            assert_eq!(
                store.pending_chunks(backend).await.unwrap().len(),
                chunks.len()
            );
        }
    }

    #[tokio::test]
    async fn test_pending_chunks_by_backend_and_hash() {
        let store = test_store().await;
        let d = doc("d1", "[2020] HKCFI 1", "[1] First.\n\n[2] Second.");
        store.upsert_document(&d).await.unwrap();
        let chunks = chunks_for(&d);
        store.replace_chunks("d1", &chunks).await.unwrap();

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
    async fn test_lexical_search_matches_and_filters() {
        let store = test_store().await;
        store
            .upsert_document(&doc(
                "a",
                "[2020] HKCFI 1",
                "The tort of negligence requires a duty of care.",
            ))
            .await
            .unwrap();
        let mut uk = doc("b", "[2020] UKSC 2", "Negligence in the law of tort.");
        uk.jurisdiction = Some("UK".to_string());
        store.upsert_document(&uk).await.unwrap();
        store
            .upsert_document(&doc("c", "[2020] HKDC 3", "A contract dispute."))
            .await
            .unwrap();

        let hits = store
            .lexical_search("negligence", 10, &RetrievalFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.raw_score > 0.0));

        let filters = RetrievalFilters {
            jurisdiction: Some("HK".to_string()),
            ..Default::default()
        };
        let hits = store.lexical_search("negligence", 10, &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "a");
    }

    #[tokio::test]
    async fn test_date_filters_exclude_undated_documents() {
        let store = test_store().await;
        let mut dated = doc("dated", "[2020] HKCFI 1", "negligence");
        dated.date = NaiveDate::from_ymd_opt(2020, 6, 1);
        let mut undated = doc("undated", "[2019] HKCFI 2", "negligence");
        undated.date = None;
        store.upsert_document(&dated).await.unwrap();
        store.upsert_document(&undated).await.unwrap();

        let filters = RetrievalFilters {
            date_from: NaiveDate::from_ymd_opt(2020, 1, 1),
            ..Default::default()
        };
        let hits = store.lexical_search("negligence", 10, &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "dated");
    }

    #[tokio::test]
    async fn test_mentions_and_identifier_join() {
        let store = test_store().await;
        let mut cited = doc("cited", "[2021] HKCFA 5", "text");
        cited.alternate_identifiers.push("[2021] 2 HKLRD 100".to_string());
        store.upsert_document(&cited).await.unwrap();
        store
            .upsert_document(&doc("citing", "[2022] HKCFI 9", "text"))
            .await
            .unwrap();

        store
            .replace_mentions(
                "citing",
                &[CitationMention {
                    source_doc_id: "citing".to_string(),
                    citation: "[2021] 2 HKLRD 100".to_string(),
                    case_name: Some("A v B".to_string()),
                    resolved_doc_id: Some("cited".to_string()),
                    is_in_corpus: true,
                }],
            )
            .await
            .unwrap();

        let mentions = store.outgoing_mentions("citing").await.unwrap();
        assert_eq!(mentions.len(), 1);
        assert!(mentions[0].is_in_corpus);
        assert_eq!(mentions[0].resolved_doc_id.as_deref(), Some("cited"));

        let index = store.identifier_index().await.unwrap();
        assert!(index.iter().any(|e| e.identifier == "[2021] 2 HKLRD 100"));

        let citing = store
            .citing_doc_ids(&[
                "[2021] HKCFA 5".to_string(),
                "[2021] 2 HKLRD 100".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(citing, vec!["citing".to_string()]);

        // Replacement fully swaps the mention set.
        store.replace_mentions("citing", &[]).await.unwrap();
        assert!(store.outgoing_mentions("citing").await.unwrap().is_empty());
    }
}
