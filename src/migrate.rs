use anyhow::Result;
use sqlx::SqlitePool;

/// Apply the schema. Every statement is idempotent, so running against an
/// already-migrated database is a no-op.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            doc_type TEXT NOT NULL,
            title TEXT NOT NULL,
            primary_identifier TEXT NOT NULL,
            jurisdiction TEXT,
            date TEXT,
            raw_text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Alternate identifiers live in their own table so the identifier
    // index is a plain union of two indexed columns.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alternate_identifiers (
            doc_id TEXT NOT NULL,
            identifier TEXT NOT NULL,
            UNIQUE(doc_id, identifier),
            FOREIGN KEY (doc_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            chunk_type TEXT NOT NULL,
            paragraph_numbers TEXT,
            section_path TEXT,
            hash TEXT NOT NULL,
            UNIQUE(doc_id, chunk_index),
            FOREIGN KEY (doc_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per (chunk, backend); the vector is little-endian f32 bytes.
    // text_hash records what the vector was computed from, for staleness.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id TEXT NOT NULL,
            backend TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            vector BLOB NOT NULL,
            text TEXT,
            chunk_type TEXT NOT NULL,
            text_hash TEXT,
            PRIMARY KEY (chunk_id, backend)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mentions (
            source_doc_id TEXT NOT NULL,
            citation TEXT NOT NULL,
            case_name TEXT,
            resolved_doc_id TEXT,
            is_in_corpus INTEGER NOT NULL DEFAULT 0,
            UNIQUE(source_doc_id, citation)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table over document full text for the lexical phase.
    // FTS5 CREATE is not idempotent natively, so we check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='docs_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE docs_fts USING fts5(
                doc_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_doc_id ON embeddings(doc_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_primary_identifier ON documents(primary_identifier)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_alternate_identifier ON alternate_identifiers(identifier)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_mentions_citation ON mentions(citation)")
        .execute(pool)
        .await?;

    Ok(())
}
