//! SQLite-backed [`IndexStore`]: one database file per tenant.
//!
//! Chunks are mirrored into an FTS5 table for keyword ranking (BM25). Vectors
//! are stored as little-endian `f32` BLOBs and ranked by brute-force cosine
//! similarity in Rust, which is fine at per-tenant corpus sizes.

use std::path::Path;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use tenant_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use tenant_rag_core::models::{Chunk, SourceDocument, UNLABELED};
use tenant_rag_core::store::{query_terms, IndexStats, IndexStore, ScoredChunk};

use crate::db;
use crate::migrate;

const CHUNK_COLUMNS: &str =
    "c.id, c.document_id, c.source, c.chunk_index, c.start_offset, c.text, c.hash, c.label";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create the index at `db_path` and bring its schema up to date.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// FTS5 ranking with an extra `AND ...` condition on the `c` (chunks) alias.
    async fn fts_search(
        &self,
        query: &str,
        limit: usize,
        extra: &str,
    ) -> Result<Vec<ScoredChunk>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            r#"
            SELECT {CHUNK_COLUMNS}, chunks_fts.rank AS rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ? {extra}
            ORDER BY rank, c.seq
            LIMIT ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(match_expr)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                ScoredChunk {
                    chunk: row_to_chunk(row),
                    score: -rank, // negate so higher = better
                }
            })
            .collect())
    }
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        source: row.get("source"),
        chunk_index: row.get("chunk_index"),
        start_offset: row.get("start_offset"),
        text: row.get("text"),
        hash: row.get("hash"),
        label: row.get("label"),
    }
}

/// Quote every term so FTS5 never sees operators or punctuation from user input.
fn fts_query(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn chunk_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn contains_document(&self, content_hash: &str) -> Result<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE content_hash = ? LIMIT 1")
                .bind(content_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn insert_document(
        &self,
        doc: &SourceDocument,
        chunks: &[Chunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()> {
        if let Some(vecs) = vectors {
            if vecs.len() != chunks.len() {
                bail!(
                    "vector count {} does not match chunk count {}",
                    vecs.len(),
                    chunks.len()
                );
            }
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO documents (id, source, content_hash, ingested_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(&doc.source)
        .bind(&doc.content_hash)
        .bind(doc.ingested_at)
        .execute(&mut *tx)
        .await?;

        for (i, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, source, chunk_index, start_offset, text, hash, label)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.source)
            .bind(chunk.chunk_index)
            .bind(chunk.start_offset)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(&chunk.label)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;

            if let Some(vec) = vectors.map(|v| &v[i]) {
                sqlx::query("INSERT INTO chunk_vectors (chunk_id, dims, embedding) VALUES (?, ?, ?)")
                    .bind(&chunk.id)
                    .bind(vec.len() as i64)
                    .bind(vec_to_blob(vec))
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_embedding(&self, chunk_id: &str, vector: &[f32]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, dims, embedding)
            VALUES (?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
        )
        .bind(chunk_id)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn chunks_without_embedding(&self, limit: usize) -> Result<Vec<Chunk>> {
        let sql = format!(
            r#"
            SELECT {CHUNK_COLUMNS}
            FROM chunks c
            LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id
            WHERE cv.chunk_id IS NULL
            ORDER BY c.seq
            LIMIT ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn chunks_with_label(&self, label: &str, limit: usize) -> Result<Vec<Chunk>> {
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks c WHERE c.label = ? ORDER BY c.seq LIMIT ?");
        let rows = sqlx::query(&sql)
            .bind(label)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn set_label(&self, chunk_id: &str, label: &str) -> Result<()> {
        let result = sqlx::query("UPDATE chunks SET label = ? WHERE id = ?")
            .bind(label)
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("unknown chunk {}", chunk_id);
        }
        Ok(())
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredChunk>> {
        self.fts_search(query, limit, "").await
    }

    async fn keyword_search_unembedded(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        self.fts_search(
            query,
            limit,
            "AND NOT EXISTS (SELECT 1 FROM chunk_vectors cv WHERE cv.chunk_id = c.id)",
        )
        .await
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        let sql = format!(
            r#"
            SELECT {CHUNK_COLUMNS}, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            ORDER BY c.seq
            "#
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                ScoredChunk {
                    chunk: row_to_chunk(row),
                    score: similarity,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let unlabeled: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE label = ?")
            .bind(UNLABELED)
            .fetch_one(&self.pool)
            .await?;
        let labeled: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE label IS NOT NULL AND label != ?")
                .bind(UNLABELED)
                .fetch_one(&self.pool)
                .await?;
        let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;

        Ok(IndexStats {
            documents: documents as u64,
            chunks: chunks as u64,
            labeled: labeled as u64,
            unlabeled: unlabeled as u64,
            embedded: embedded as u64,
        })
    }
}
