//! # tenant-rag core
//!
//! Runtime-agnostic logic shared by the `tenant-rag` application: chunk and
//! document models, the overlapping character chunker, the index store
//! abstraction (with an in-memory backend), the embedder trait with vector
//! utilities, and prompt assembly for the conversation pipeline.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod prompt;
pub mod store;
