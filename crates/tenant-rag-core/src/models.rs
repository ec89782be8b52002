//! Data types that flow through ingestion and retrieval.

use serde::{Deserialize, Serialize};

/// Label assigned to a chunk whose labeling attempts were exhausted.
pub const UNLABELED: &str = "Unlabeled";

/// One ingested source file.
///
/// `content_hash` is the SHA-256 of the extracted body and is the identity
/// used to skip re-ingestion of unchanged content.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    /// File name inside the directory it was ingested from.
    pub source: String,
    pub content_hash: String,
    /// Unix seconds.
    pub ingested_at: i64,
}

/// A slice of a document's body stored as the atomic retrieval unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub source: String,
    pub chunk_index: i64,
    /// Offset of the first character of `text` within the document body,
    /// counted in characters (not bytes).
    pub start_offset: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    pub label: Option<String>,
}

impl Chunk {
    pub fn is_unlabeled(&self) -> bool {
        self.label.as_deref() == Some(UNLABELED)
    }
}

/// One turn of conversation history: the user's message and the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub human: String,
    pub assistant: String,
}

impl Exchange {
    pub fn new(human: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            human: human.into(),
            assistant: assistant.into(),
        }
    }
}

/// A role-tagged chat message as sent by chat front-ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
}
