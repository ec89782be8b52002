//! In-memory [`IndexStore`] implementation for testing and ephemeral tenants.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Insertion order is kept so ties
//! in ranking resolve oldest first. Vector search is brute-force cosine
//! similarity; keyword search counts distinct query terms per chunk.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, SourceDocument, UNLABELED};

use super::{query_terms, IndexStats, IndexStore, ScoredChunk};

#[derive(Default)]
struct Tables {
    documents: Vec<SourceDocument>,
    chunks: Vec<Chunk>,
    vectors: HashMap<String, Vec<f32>>,
}

/// In-memory index store. Contents are lost when the value is dropped.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))
    }

    /// Chunks accepted by `keep`, scored by how many query terms they contain.
    fn term_matches(
        &self,
        query: &str,
        limit: usize,
        keep: impl Fn(&Tables, &Chunk) -> bool,
    ) -> Result<Vec<ScoredChunk>> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let guard = self.read()?;
        let tables: &Tables = &guard;
        let scored = tables
            .chunks
            .iter()
            .filter(|c| keep(tables, *c))
            .filter_map(|c| {
                let text = c.text.to_lowercase();
                let matches = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (matches > 0).then(|| ScoredChunk {
                    chunk: c.clone(),
                    score: matches as f64,
                })
            })
            .collect();
        Ok(rank(scored, limit))
    }
}

fn rank(mut scored: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    // Stable sort keeps insertion order among equal scores.
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn chunk_count(&self) -> Result<u64> {
        Ok(self.read()?.chunks.len() as u64)
    }

    async fn contains_document(&self, content_hash: &str) -> Result<bool> {
        Ok(self
            .read()?
            .documents
            .iter()
            .any(|d| d.content_hash == content_hash))
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
        let mut tables = self.write()?;
        if tables.documents.iter().any(|d| d.id == doc.id) {
            bail!("document {} already exists", doc.id);
        }
        tables.documents.push(doc.clone());
        tables.chunks.extend(chunks.iter().cloned());
        if let Some(vecs) = vectors {
            for (c, v) in chunks.iter().zip(vecs) {
                tables.vectors.insert(c.id.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn upsert_embedding(&self, chunk_id: &str, vector: &[f32]) -> Result<()> {
        let mut tables = self.write()?;
        if !tables.chunks.iter().any(|c| c.id == chunk_id) {
            bail!("unknown chunk {}", chunk_id);
        }
        tables.vectors.insert(chunk_id.to_string(), vector.to_vec());
        Ok(())
    }

    async fn chunks_without_embedding(&self, limit: usize) -> Result<Vec<Chunk>> {
        let tables = self.read()?;
        Ok(tables
            .chunks
            .iter()
            .filter(|c| !tables.vectors.contains_key(&c.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn chunks_with_label(&self, label: &str, limit: usize) -> Result<Vec<Chunk>> {
        Ok(self
            .read()?
            .chunks
            .iter()
            .filter(|c| c.label.as_deref() == Some(label))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_label(&self, chunk_id: &str, label: &str) -> Result<()> {
        let mut tables = self.write()?;
        match tables.chunks.iter_mut().find(|c| c.id == chunk_id) {
            Some(chunk) => {
                chunk.label = Some(label.to_string());
                Ok(())
            }
            None => bail!("unknown chunk {}", chunk_id),
        }
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredChunk>> {
        self.term_matches(query, limit, |_, _| true)
    }

    async fn keyword_search_unembedded(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        self.term_matches(query, limit, |tables, chunk| {
            !tables.vectors.contains_key(&chunk.id)
        })
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let tables = self.read()?;
        let scored = tables
            .chunks
            .iter()
            .filter_map(|c| {
                tables.vectors.get(&c.id).map(|v| ScoredChunk {
                    chunk: c.clone(),
                    score: cosine_similarity(query_vec, v) as f64,
                })
            })
            .collect();
        Ok(rank(scored, limit))
    }

    async fn stats(&self) -> Result<IndexStats> {
        let tables = self.read()?;
        let unlabeled = tables.chunks.iter().filter(|c| c.is_unlabeled()).count() as u64;
        let labeled = tables
            .chunks
            .iter()
            .filter(|c| matches!(c.label.as_deref(), Some(l) if l != UNLABELED))
            .count() as u64;
        Ok(IndexStats {
            documents: tables.documents.len() as u64,
            chunks: tables.chunks.len() as u64,
            labeled,
            unlabeled,
            embedded: tables.vectors.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{split_text, ChunkParams};

    fn doc(id: &str, hash: &str) -> SourceDocument {
        SourceDocument {
            id: id.to_string(),
            source: format!("{}.txt", id),
            content_hash: hash.to_string(),
            ingested_at: 1_700_000_000,
        }
    }

    fn chunks_for(id: &str, text: &str) -> Vec<Chunk> {
        split_text(id, &format!("{}.txt", id), text, ChunkParams::default())
    }

    #[tokio::test]
    async fn test_insert_and_count() {
        let store = InMemoryStore::new();
        assert_eq!(store.chunk_count().await.unwrap(), 0);
        let chunks = chunks_for("a", &"word ".repeat(500));
        store.insert_document(&doc("a", "h1"), &chunks, None).await.unwrap();
        assert_eq!(store.chunk_count().await.unwrap(), chunks.len() as u64);
        assert!(store.contains_document("h1").await.unwrap());
        assert!(!store.contains_document("h2").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_document_id_rejected() {
        let store = InMemoryStore::new();
        let chunks = chunks_for("a", "hello");
        store.insert_document(&doc("a", "h1"), &chunks, None).await.unwrap();
        assert!(store.insert_document(&doc("a", "h1"), &chunks, None).await.is_err());
        assert_eq!(store.chunk_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_keyword_search_ranks_by_matched_terms() {
        let store = InMemoryStore::new();
        let one = chunks_for("one", "the mission statement");
        let two = chunks_for("two", "our mission and our vision");
        store.insert_document(&doc("one", "h1"), &one, None).await.unwrap();
        store.insert_document(&doc("two", "h2"), &two, None).await.unwrap();

        let hits = store.keyword_search("Mission? Vision!", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.document_id, "two");
        assert_eq!(hits[0].score, 2.0);

        assert!(store.keyword_search("zebra", 5).await.unwrap().is_empty());
        assert!(store.keyword_search("???", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vector_search_and_backfill() {
        let store = InMemoryStore::new();
        let a = chunks_for("a", "alpha");
        let b = chunks_for("b", "beta");
        store
            .insert_document(&doc("a", "h1"), &a, Some(&[vec![1.0, 0.0]]))
            .await
            .unwrap();
        store.insert_document(&doc("b", "h2"), &b, None).await.unwrap();

        let pending = store.chunks_without_embedding(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b[0].id);
        let unembedded = store.keyword_search_unembedded("alpha beta", 5).await.unwrap();
        assert_eq!(unembedded.len(), 1);
        assert_eq!(unembedded[0].chunk.id, b[0].id);

        store.upsert_embedding(&b[0].id, &[0.0, 1.0]).await.unwrap();
        assert!(store.chunks_without_embedding(10).await.unwrap().is_empty());
        assert!(store
            .keyword_search_unembedded("alpha beta", 5)
            .await
            .unwrap()
            .is_empty());

        let hits = store.vector_search(&[0.1, 0.9], 5).await.unwrap();
        assert_eq!(hits[0].chunk.id, b[0].id);
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_mismatched_vectors_rejected() {
        let store = InMemoryStore::new();
        let a = chunks_for("a", "alpha");
        let result = store
            .insert_document(&doc("a", "h1"), &a, Some(&[vec![1.0], vec![2.0]]))
            .await;
        assert!(result.is_err());
        assert_eq!(store.chunk_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_relabel_and_stats() {
        let store = InMemoryStore::new();
        let mut chunks = chunks_for("a", &"x".repeat(2000));
        chunks[0].label = Some("Pricing".to_string());
        chunks[1].label = Some(UNLABELED.to_string());
        chunks[2].label = Some(UNLABELED.to_string());
        store.insert_document(&doc("a", "h1"), &chunks, None).await.unwrap();

        let pending = store.chunks_with_label(UNLABELED, 1).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, chunks[1].id);

        store.set_label(&chunks[1].id, "Support").await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            IndexStats {
                documents: 1,
                chunks: 3,
                labeled: 2,
                unlabeled: 1,
                embedded: 0,
            }
        );
        assert!(store.set_label("missing", "x").await.is_err());
    }
}
