//! # Tenant RAG
//!
//! Multi-tenant document ingestion and retrieval-augmented answering.
//!
//! Every tenant owns one dataset directory and one persisted index. Documents
//! are split into overlapping chunks, labeled through a rate-limited external
//! service, optionally embedded, and stored in the tenant's SQLite index.
//! Questions are answered from the top-k retrieved chunks plus recent
//! conversation history.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │   Intake    │──▶│ TenantIndex (per id)  │──▶│ index.sqlite │
//! │ FAQ/crawl/  │   │ chunk → label → embed │   │ FTS5 + vecs  │
//! │ uploads     │   └──────────┬────────────┘   └──────┬───────┘
//! └─────────────┘              │ RateLimiter          │
//!                              ▼ (shared)             ▼
//!                       labeling service    ConversationPipeline
//!                                            retrieve → prompt → completion
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed request errors |
//! | [`tenant`] | Per-tenant locations, ingestion and retrieval |
//! | [`registry`] | Tenant id → index |
//! | [`conversation`] | Answering with context and history |
//! | [`intake`] | FAQ, manual text, crawl import, staged uploads |
//! | [`labeling`] | Chunk labeling sessions |
//! | [`rate_limit`] | Request and token budget per minute |
//! | [`retry`] | Backoff with jitter |
//! | [`loaders`] | File extension → text segments |
//! | [`extract`] | PDF, Office and EPUB text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`completion`] | Completion providers |
//! | [`sqlite_store`] | SQLite index backend |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod commands;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod http;
pub mod intake;
pub mod labeling;
pub mod loaders;
pub mod migrate;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod sqlite_store;
pub mod tenant;

pub use tenant_rag_core::{chunk, models, prompt, store};
