//! Overlapping fixed-window text chunker.
//!
//! Splits a document body into [`Chunk`]s of at most `size` characters where
//! every chunk after the first starts `size - overlap` characters after its
//! predecessor. Adjacent chunks therefore share exactly `overlap` characters,
//! so nothing that straddles a window edge is lost.
//!
//! Lengths and offsets are counted in characters, never bytes, so slicing
//! always lands on UTF-8 boundaries.
//!
//! # Example
//!
//! ```rust
//! use tenant_rag_core::chunk::{split_text, ChunkParams};
//!
//! let body = "x".repeat(2600);
//! let chunks = split_text("doc-1", "notes.txt", &body, ChunkParams::default());
//! let offsets: Vec<i64> = chunks.iter().map(|c| c.start_offset).collect();
//! assert_eq!(offsets, vec![0, 824, 1648]);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Window size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkParams {
    /// Distance between consecutive start offsets. Never zero.
    pub fn stride(&self) -> usize {
        self.size.saturating_sub(self.overlap).max(1)
    }
}

/// Split `text` into overlapping windows.
///
/// Returns no chunks for empty or whitespace-only text. Otherwise the last
/// chunk is the first window that reaches the end of the text, so it may be
/// shorter than `params.size`.
pub fn split_text(document_id: &str, source: &str, text: &str, params: ChunkParams) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let size = params.size.max(1);
    let stride = params.stride();

    // Byte offset of every char, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = boundaries.len() - 1;

    let mut chunks = Vec::with_capacity(total_chars / stride + 1);
    let mut start = 0usize;
    let mut index: i64 = 0;

    loop {
        let end = (start + size).min(total_chars);
        let piece = &text[boundaries[start]..boundaries[end]];
        chunks.push(make_chunk(document_id, source, index, start as i64, piece));
        if end == total_chars {
            break;
        }
        start += stride;
        index += 1;
    }

    chunks
}

/// SHA-256 of a string, lowercase hex.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document_id: &str, source: &str, index: i64, start_offset: i64, text: &str) -> Chunk {
    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        source: source.to_string(),
        chunk_index: index,
        start_offset,
        text: text.to_string(),
        hash: hash_text(text),
        label: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_text(len: usize) -> String {
        (0..len)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    #[test]
    fn test_empty_and_blank_text_produce_no_chunks() {
        assert!(split_text("d", "f.txt", "", ChunkParams::default()).is_empty());
        assert!(split_text("d", "f.txt", "  \n\n\t ", ChunkParams::default()).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split_text("d", "f.txt", "Hello, world!", ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].source, "f.txt");
        assert!(chunks[0].label.is_none());
    }

    #[test]
    fn test_2600_chars_gives_three_windows() {
        let text = numbered_text(2600);
        let chunks = split_text("d", "f.txt", &text, ChunkParams::default());
        let lens: Vec<usize> = chunks.iter().map(|c| c.text.chars().count()).collect();
        assert_eq!(lens, vec![1024, 1024, 952]);
        let offsets: Vec<i64> = chunks.iter().map(|c| c.start_offset).collect();
        assert_eq!(offsets, vec![0, 824, 1648]);
    }

    #[test]
    fn test_3000_chars_needs_four_windows() {
        let text = numbered_text(3000);
        let chunks = split_text("d", "f.txt", &text, ChunkParams::default());
        let offsets: Vec<i64> = chunks.iter().map(|c| c.start_offset).collect();
        assert_eq!(offsets, vec![0, 824, 1648, 2472]);
        assert_eq!(chunks[3].text.chars().count(), 528);
    }

    #[test]
    fn test_adjacent_chunks_overlap_exactly() {
        for len in [1025usize, 1848, 2000, 4096, 9999] {
            let text = numbered_text(len);
            let params = ChunkParams::default();
            let chunks = split_text("d", "f.txt", &text, params);
            for pair in chunks.windows(2) {
                assert!(pair[1].start_offset > pair[0].start_offset);
                let tail: String = pair[0].text.chars().skip(params.size - params.overlap).collect();
                let head: String = pair[1].text.chars().take(params.overlap).collect();
                assert_eq!(tail.chars().count(), params.overlap, "len {}", len);
                assert_eq!(tail, head, "len {}", len);
            }
            // Every chunk is a verbatim slice at its recorded offset.
            for c in &chunks {
                let expected: String = text
                    .chars()
                    .skip(c.start_offset as usize)
                    .take(c.text.chars().count())
                    .collect();
                assert_eq!(c.text, expected);
            }
            let last = chunks.last().unwrap();
            assert_eq!(
                last.start_offset as usize + last.text.chars().count(),
                len,
                "last chunk must reach the end"
            );
        }
    }

    #[test]
    fn test_indices_contiguous() {
        let text = numbered_text(5000);
        let chunks = split_text("d", "f.txt", &text, ChunkParams::default());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.document_id, "d");
        }
    }

    #[test]
    fn test_multibyte_text_counts_chars() {
        let text = "┌─é─┐ ".repeat(300);
        let params = ChunkParams {
            size: 100,
            overlap: 20,
        };
        let chunks = split_text("d", "f.txt", &text, params);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].text.chars().count(), 100);
        assert_eq!(chunks[1].start_offset, 80);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let text = numbered_text(1500);
        let a = split_text("d", "f.txt", &text, ChunkParams::default());
        let b = split_text("d", "f.txt", &text, ChunkParams::default());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.hash, y.hash);
            assert_ne!(x.id, y.id);
        }
    }
}
