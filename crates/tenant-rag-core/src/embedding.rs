//! Embedder trait and vector utilities.
//!
//! The embedding model is an opaque external service: the index only needs
//! one vector per chunk and one per query. Concrete backends (OpenAI, Ollama,
//! fastembed) live in the `tenant-rag` app crate.

use anyhow::Result;
use async_trait::async_trait;

/// A text embedding backend.
///
/// `embed` must return exactly one vector per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality, `0` when embeddings are disabled.
    fn dims(&self) -> usize;
    /// Whether the backend produces vectors at all. When `false` the index
    /// ranks by keyword match instead.
    fn is_enabled(&self) -> bool {
        self.dims() > 0
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query string.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Encode a vector as little-endian `f32` bytes for BLOB storage.
///
/// ```rust
/// use tenant_rag_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.5f32, -1.0];
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, zero or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b.iter())
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
