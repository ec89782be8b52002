//! Storage abstraction for one tenant's index.
//!
//! An [`IndexStore`] holds the documents, chunks, labels and vectors of a
//! single tenant. Stores never see a tenant id: isolation comes from every
//! tenant owning its own store instance at its own location.
//!
//! Backends: SQLite (in the app crate) and [`memory::InMemoryStore`].

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Chunk, SourceDocument};

/// A chunk returned from a search with its raw backend score
/// (higher is more similar).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// Row counts of one index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub documents: u64,
    pub chunks: u64,
    /// Chunks with a real topic label.
    pub labeled: u64,
    /// Chunks carrying the sentinel label.
    pub unlabeled: u64,
    pub embedded: u64,
}

/// Abstract per-tenant index backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`chunk_count`](IndexStore::chunk_count) | Emptiness check before bulk load |
/// | [`contains_document`](IndexStore::contains_document) | Content-hash dedup |
/// | [`insert_document`](IndexStore::insert_document) | Append a document and its chunks |
/// | [`upsert_embedding`](IndexStore::upsert_embedding) | Store a vector for a chunk |
/// | [`chunks_without_embedding`](IndexStore::chunks_without_embedding) | Embedding backfill |
/// | [`chunks_with_label`](IndexStore::chunks_with_label) | Relabel pass |
/// | [`set_label`](IndexStore::set_label) | Relabel pass |
/// | [`keyword_search`](IndexStore::keyword_search) | Term-match ranking |
/// | [`keyword_search_unembedded`](IndexStore::keyword_search_unembedded) | Term-match ranking of chunks not yet embedded |
/// | [`vector_search`](IndexStore::vector_search) | Cosine similarity ranking |
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn chunk_count(&self) -> Result<u64>;

    /// Whether a document with this content hash was already ingested.
    async fn contains_document(&self, content_hash: &str) -> Result<bool>;

    /// Append a document and all of its chunks in one atomic write.
    ///
    /// `vectors`, when present, is parallel to `chunks`; a chunk without a
    /// vector is left for a later backfill. Existing rows are never modified.
    async fn insert_document(
        &self,
        doc: &SourceDocument,
        chunks: &[Chunk],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()>;

    async fn upsert_embedding(&self, chunk_id: &str, vector: &[f32]) -> Result<()>;

    /// Chunks that have no stored vector, oldest first.
    async fn chunks_without_embedding(&self, limit: usize) -> Result<Vec<Chunk>>;

    /// Chunks whose label equals `label`, oldest first.
    async fn chunks_with_label(&self, label: &str, limit: usize) -> Result<Vec<Chunk>>;

    async fn set_label(&self, chunk_id: &str, label: &str) -> Result<()>;

    /// Rank chunks by query-term matches, best first.
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredChunk>>;

    /// [`keyword_search`](IndexStore::keyword_search) restricted to chunks
    /// with no stored vector.
    async fn keyword_search_unembedded(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Rank embedded chunks by cosine similarity to `query_vec`, best first.
    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredChunk>>;

    async fn stats(&self) -> Result<IndexStats>;
}

/// Lowercased alphanumeric terms of a free-text query, deduplicated in order.
///
/// ```rust
/// use tenant_rag_core::store::query_terms;
///
/// assert_eq!(query_terms("What is X? what"), vec!["what", "is", "x"]);
/// ```
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let lower = word.to_lowercase();
        if !terms.contains(&lower) {
            terms.push(lower);
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms_strips_punctuation() {
        assert_eq!(
            query_terms("  \"mission\" & vision?!"),
            vec!["mission", "vision"]
        );
        assert!(query_terms("?? --").is_empty());
    }
}
