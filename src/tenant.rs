//! One tenant's dataset and index.
//!
//! A [`TenantIndex`] owns exactly one dataset directory and one persisted
//! index, both derived from the tenant id by [`Layout`]. The index is opened
//! lazily on first use. The first retrieval on an empty index bulk-loads the
//! dataset directory.
//!
//! # Ingestion pipeline
//!
//! ```text
//! directory
//!   → supported files (loader registry, sorted by name)
//!   → segments → body (segments joined by a blank line)
//!   → skip if body hash already indexed
//!   → overlapping chunks → labels (rate limited) → vectors (best effort)
//!   → one transaction per file
//! ```
//!
//! Writers (bulk load, incremental updates, relabel, embedding backfill) are
//! serialized per tenant. Retrieval never waits for a writer once the bulk
//! load check has run.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

use tenant_rag_core::chunk::{hash_text, split_text, ChunkParams};
use tenant_rag_core::embedding::{embed_query, Embedder};
use tenant_rag_core::models::{Chunk, SourceDocument, UNLABELED};
use tenant_rag_core::store::memory::InMemoryStore;
use tenant_rag_core::store::{IndexStats, IndexStore, ScoredChunk};

use crate::completion::{create_completion, create_labeling_completion, CompletionProvider};
use crate::config::{Config, StorageConfig};
use crate::embedding::create_embedder;
use crate::error::RagError;
use crate::labeling::{create_labeler, Labeler, LabelingReport, LabelingSession, LabelingSettings};
use crate::loaders::LoaderRegistry;
use crate::rate_limit::RateLimiter;
use crate::sqlite_store::SqliteStore;

/// File name of the SQLite index inside a tenant's index directory.
pub const INDEX_FILE: &str = "index.sqlite";
pub const MAX_TENANT_ID_LEN: usize = 128;

const EMBED_BATCH: usize = 64;

/// Tenant ids are `[A-Za-z0-9_-]{1,128}`, so a location derived from one
/// can never escape its prefix.
pub fn validate_tenant_id(id: &str) -> Result<(), RagError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_TENANT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RagError::InvalidTenantId { id: id.to_string() })
    }
}

/// Derives every tenant location as `<prefix><tenant_id>`.
#[derive(Debug, Clone)]
pub struct Layout {
    dataset_prefix: String,
    index_prefix: String,
    staging_prefix: String,
}

impl Layout {
    pub fn new(
        dataset_prefix: impl Into<String>,
        index_prefix: impl Into<String>,
        staging_prefix: impl Into<String>,
    ) -> Self {
        Self {
            dataset_prefix: dataset_prefix.into(),
            index_prefix: index_prefix.into(),
            staging_prefix: staging_prefix.into(),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(
            storage.dataset_prefix.clone(),
            storage.index_prefix.clone(),
            storage.staging_prefix.clone(),
        )
    }

    pub fn dataset_dir(&self, tenant_id: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.dataset_prefix, tenant_id))
    }

    pub fn index_dir(&self, tenant_id: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.index_prefix, tenant_id))
    }

    pub fn staging_dir(&self, tenant_id: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.staging_prefix, tenant_id))
    }

    pub fn index_path(&self, tenant_id: &str) -> PathBuf {
        self.index_dir(tenant_id).join(INDEX_FILE)
    }

    /// Tenants whose dataset, index or staging location is `path` or one of
    /// its ancestors, nearest first.
    ///
    /// Only existing paths can be attributed; both sides are canonicalized so
    /// relative paths and symlinks compare correctly.
    pub fn owners_of(&self, path: &Path) -> Vec<String> {
        let Ok(canonical) = path.canonicalize() else {
            return Vec::new();
        };
        let dirs: Vec<(PathBuf, String)> =
            [&self.dataset_prefix, &self.index_prefix, &self.staging_prefix]
                .into_iter()
                .filter_map(|prefix| {
                    let (dir, stem) = split_prefix(prefix);
                    dir.canonicalize().ok().map(|dir| (dir, stem))
                })
                .collect();

        let mut owners: Vec<String> = Vec::new();
        for ancestor in canonical.ancestors() {
            let (Some(parent), Some(name)) = (
                ancestor.parent(),
                ancestor.file_name().and_then(|n| n.to_str()),
            ) else {
                continue;
            };
            for (dir, stem) in &dirs {
                if dir.as_path() != parent {
                    continue;
                }
                if let Some(id) = name.strip_prefix(stem.as_str()) {
                    if validate_tenant_id(id).is_ok() && !owners.iter().any(|o| o == id) {
                        owners.push(id.to_string());
                    }
                }
            }
        }
        owners
    }
}

/// `"data/dataset_"` → (`data`, `dataset_`); `"data/tenants/"` → (`data/tenants/`, ``).
fn split_prefix(prefix: &str) -> (PathBuf, String) {
    if prefix.ends_with('/') || prefix.ends_with(std::path::MAIN_SEPARATOR) {
        return (PathBuf::from(prefix), String::new());
    }
    let path = Path::new(prefix);
    let stem = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    (parent, stem)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Memory,
}

impl Backend {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "sqlite" => Ok(Backend::Sqlite),
            "memory" => Ok(Backend::Memory),
            other => anyhow::bail!("Unknown storage backend: {}", other),
        }
    }
}

/// Collaborators and settings shared by every tenant of one registry.
pub struct Services {
    pub backend: Backend,
    pub embedder: Arc<dyn Embedder>,
    pub completion: Arc<dyn CompletionProvider>,
    pub labeler: Arc<dyn Labeler>,
    /// One limiter per labeling credential, shared by all tenants.
    pub limiter: Arc<RateLimiter>,
    pub loaders: LoaderRegistry,
    pub chunking: ChunkParams,
    pub labeling: LabelingSettings,
    pub top_k: usize,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        let completion = create_completion(&config.completion)?;
        let labeler = create_labeler(
            &config.labeling,
            create_labeling_completion(&config.completion)?,
        )?;
        Ok(Self {
            backend: Backend::parse(&config.storage.backend)?,
            embedder: create_embedder(&config.embedding)?,
            completion,
            labeler,
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            loaders: LoaderRegistry::standard(),
            chunking: config.chunking.params(),
            labeling: LabelingSettings::from_config(&config.labeling),
            top_k: config.retrieval.top_k,
        })
    }
}

/// Outcome of one ingestion run over a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Supported files found in the directory.
    pub files: usize,
    pub ingested: usize,
    /// Files whose body is already indexed.
    pub unchanged: usize,
    /// Files with no extractable text.
    pub empty: usize,
    /// Files that could not be read or parsed.
    pub failed: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub labels: LabelingReport,
}

enum FileOutcome {
    Added { chunks: usize, embedded: usize },
    Unchanged,
    Empty,
    Failed,
}

struct WriterState {
    bulk_checked: bool,
}

pub struct TenantIndex {
    tenant_id: String,
    layout: Layout,
    services: Arc<Services>,
    store: OnceCell<Arc<dyn IndexStore>>,
    writer: Mutex<WriterState>,
    loaded: AtomicBool,
}

impl std::fmt::Debug for TenantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantIndex")
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

impl TenantIndex {
    /// Does not touch the filesystem; the index opens on first use.
    pub fn new(tenant_id: &str, layout: Layout, services: Arc<Services>) -> Result<Self, RagError> {
        validate_tenant_id(tenant_id)?;
        Ok(Self {
            tenant_id: tenant_id.to_string(),
            layout,
            services,
            store: OnceCell::new(),
            writer: Mutex::new(WriterState {
                bulk_checked: false,
            }),
            loaded: AtomicBool::new(false),
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.layout.dataset_dir(&self.tenant_id)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.layout.staging_dir(&self.tenant_id)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.layout.index_dir(&self.tenant_id)
    }

    pub fn is_open(&self) -> bool {
        self.store.initialized()
    }

    async fn store(&self) -> Result<&Arc<dyn IndexStore>> {
        self.store
            .get_or_try_init(|| async {
                let store: Arc<dyn IndexStore> = match self.services.backend {
                    Backend::Sqlite => {
                        let path = self.layout.index_path(&self.tenant_id);
                        tracing::debug!(tenant = %self.tenant_id, path = %path.display(), "opening index");
                        Arc::new(SqliteStore::open(&path).await?)
                    }
                    Backend::Memory => Arc::new(InMemoryStore::new()),
                };
                Ok::<_, anyhow::Error>(store)
            })
            .await
    }

    /// Open the index, bulk-load the dataset directory if the index is
    /// empty, and return a search handle.
    pub async fn retriever(&self) -> Result<Retriever> {
        self.ensure_loaded().await?;
        Ok(Retriever {
            store: self.store().await?.clone(),
            embedder: self.services.embedder.clone(),
            k: self.services.top_k,
        })
    }

    async fn ensure_loaded(&self) -> Result<()> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.writer.lock().await;
        if !state.bulk_checked {
            let store = self.store().await?;
            if store.chunk_count().await? == 0 {
                tracing::info!(tenant = %self.tenant_id, "index empty, loading dataset");
                let dir = self.dataset_dir();
                ensure_dir(&dir)?;
                self.ingest_dir(store.as_ref(), &dir).await?;
            }
            state.bulk_checked = true;
            self.loaded.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Ingest every supported file of the tenant's dataset directory.
    pub async fn load_documents(&self) -> Result<IngestReport> {
        let dir = self.dataset_dir();
        ensure_dir(&dir)?;
        let _guard = self.writer.lock().await;
        let store = self.store().await?;
        self.ingest_dir(store.as_ref(), &dir).await
    }

    /// Append the contents of `dir` to the index. Existing chunks are never
    /// modified; files whose body is already indexed are skipped.
    pub async fn update_document_set(&self, dir: &Path) -> Result<IngestReport> {
        ensure_dir(dir)?;
        let foreign = self
            .layout
            .owners_of(dir)
            .into_iter()
            .find(|owner| *owner != self.tenant_id);
        if let Some(owner) = foreign {
            return Err(RagError::ForeignLocation {
                path: dir.to_path_buf(),
                tenant: self.tenant_id.clone(),
                owner,
            }
            .into());
        }
        let _guard = self.writer.lock().await;
        let store = self.store().await?;
        self.ingest_dir(store.as_ref(), dir).await
    }

    async fn ingest_dir(&self, store: &dyn IndexStore, dir: &Path) -> Result<IngestReport> {
        let files = self.services.loaders.supported_files(dir)?;
        let mut report = IngestReport {
            files: files.len(),
            ..IngestReport::default()
        };
        let mut session = LabelingSession::new(
            self.services.labeler.as_ref(),
            self.services.limiter.as_ref(),
            self.services.labeling,
        );

        for path in &files {
            match self.ingest_file(store, path, &mut session).await? {
                FileOutcome::Added { chunks, embedded } => {
                    report.ingested += 1;
                    report.chunks += chunks;
                    report.embedded += embedded;
                }
                FileOutcome::Unchanged => report.unchanged += 1,
                FileOutcome::Empty => report.empty += 1,
                FileOutcome::Failed => report.failed += 1,
            }
        }
        report.labels = session.report();

        tracing::info!(
            tenant = %self.tenant_id,
            dir = %dir.display(),
            files = report.files,
            ingested = report.ingested,
            unchanged = report.unchanged,
            failed = report.failed,
            chunks = report.chunks,
            "ingestion finished"
        );
        Ok(report)
    }

    /// Errors returned from here are index failures; per-file problems are
    /// logged and reported as [`FileOutcome::Failed`].
    async fn ingest_file(
        &self,
        store: &dyn IndexStore,
        path: &Path,
        session: &mut LabelingSession<'_>,
    ) -> Result<FileOutcome> {
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let Some(loader) = self.services.loaders.get(path) else {
            return Ok(FileOutcome::Failed);
        };

        let owned = path.to_path_buf();
        let segments = match tokio::task::spawn_blocking(move || loader(&owned)).await {
            Ok(Ok(segments)) => segments,
            Ok(Err(e)) => {
                tracing::warn!(tenant = %self.tenant_id, file = %source, error = %e, "skipping unreadable file");
                return Ok(FileOutcome::Failed);
            }
            Err(e) => {
                tracing::warn!(tenant = %self.tenant_id, file = %source, error = %e, "loader panicked");
                return Ok(FileOutcome::Failed);
            }
        };

        let body = segments.join("\n\n");
        if body.trim().is_empty() {
            tracing::debug!(tenant = %self.tenant_id, file = %source, "no text extracted");
            return Ok(FileOutcome::Empty);
        }

        let content_hash = hash_text(&body);
        if store.contains_document(&content_hash).await? {
            tracing::debug!(tenant = %self.tenant_id, file = %source, "already indexed");
            return Ok(FileOutcome::Unchanged);
        }

        let doc = SourceDocument {
            id: Uuid::new_v4().to_string(),
            source: source.clone(),
            content_hash,
            ingested_at: chrono::Utc::now().timestamp(),
        };
        let mut chunks = split_text(&doc.id, &source, &body, self.services.chunking);
        session.label(&mut chunks).await;

        let vectors = self.embed_chunks(&chunks, &source).await;
        store
            .insert_document(&doc, &chunks, vectors.as_deref())
            .await?;

        tracing::info!(tenant = %self.tenant_id, file = %source, chunks = chunks.len(), "ingested file");
        Ok(FileOutcome::Added {
            chunks: chunks.len(),
            embedded: vectors.map(|v| v.len()).unwrap_or(0),
        })
    }

    /// Vectors for `chunks`, or `None` when embedding is disabled or fails.
    /// Missing vectors are filled in later by [`embed_pending`](Self::embed_pending).
    async fn embed_chunks(&self, chunks: &[Chunk], source: &str) -> Option<Vec<Vec<f32>>> {
        let embedder = &self.services.embedder;
        if !embedder.is_enabled() || chunks.is_empty() {
            return None;
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        match embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == chunks.len() => Some(vectors),
            Ok(vectors) => {
                tracing::warn!(
                    tenant = %self.tenant_id,
                    file = %source,
                    expected = chunks.len(),
                    got = vectors.len(),
                    "embedding count mismatch, storing without vectors"
                );
                None
            }
            Err(e) => {
                tracing::warn!(tenant = %self.tenant_id, file = %source, error = %e, "embedding failed, storing without vectors");
                None
            }
        }
    }

    /// Label every chunk in `chunks`. Exhausted chunks get the sentinel label.
    pub async fn label_documents(&self, chunks: &mut [Chunk]) -> LabelingReport {
        let mut session = LabelingSession::new(
            self.services.labeler.as_ref(),
            self.services.limiter.as_ref(),
            self.services.labeling,
        );
        session.label(chunks).await;
        session.report()
    }

    /// Retry labeling for up to `limit` chunks that carry the sentinel label.
    /// Chunks that fail again keep it.
    pub async fn relabel_unlabeled(&self, limit: usize) -> Result<LabelingReport> {
        if !self.services.labeler.is_enabled() {
            anyhow::bail!("Labeling is disabled. Set [labeling] provider in config.");
        }
        let _guard = self.writer.lock().await;
        let store = self.store().await?;
        let mut pending = store.chunks_with_label(UNLABELED, limit).await?;
        let mut session = LabelingSession::new(
            self.services.labeler.as_ref(),
            self.services.limiter.as_ref(),
            self.services.labeling,
        );
        for chunk in pending.iter_mut() {
            session.label(std::slice::from_mut(chunk)).await;
            if let Some(label) = chunk.label.as_deref().filter(|l| *l != UNLABELED) {
                store.set_label(&chunk.id, label).await?;
            }
        }
        let report = session.report();
        tracing::info!(tenant = %self.tenant_id, relabeled = report.labeled, still_unlabeled = report.unlabeled, "relabel finished");
        Ok(report)
    }

    /// Embed up to `limit` chunks stored without a vector. Returns how many
    /// were embedded.
    pub async fn embed_pending(&self, limit: usize) -> Result<usize> {
        let embedder = &self.services.embedder;
        if !embedder.is_enabled() {
            anyhow::bail!("Embeddings are disabled. Set [embedding] provider in config.");
        }
        let _guard = self.writer.lock().await;
        let store = self.store().await?;
        let pending = store.chunks_without_embedding(limit).await?;
        let mut done = 0;
        for batch in pending.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                anyhow::bail!(
                    "Embedding count mismatch: expected {}, got {}",
                    batch.len(),
                    vectors.len()
                );
            }
            for (chunk, vector) in batch.iter().zip(&vectors) {
                store.upsert_embedding(&chunk.id, vector).await?;
            }
            done += batch.len();
        }
        tracing::info!(tenant = %self.tenant_id, embedded = done, "embedding backfill finished");
        Ok(done)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.store().await?.stats().await
    }
}

fn ensure_dir(dir: &Path) -> Result<(), RagError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(RagError::DirectoryNotFound {
            path: dir.to_path_buf(),
        })
    }
}

/// Top-k search over one tenant's index.
///
/// Uses vector similarity when an embedder is configured and the index has
/// vectors; otherwise ranks by keyword match.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    k: usize,
}

impl Retriever {
    pub fn k(&self) -> usize {
        self.k
    }

    /// Up to `k` chunks, most similar first.
    pub async fn search(&self, query: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .search_scored(query)
            .await?
            .into_iter()
            .map(|s| s.chunk)
            .collect())
    }

    pub async fn search_scored(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        if !self.embedder.is_enabled() {
            return self.store.keyword_search(query, self.k).await;
        }
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let by_vector = self.store.vector_search(&query_vec, self.k).await?;
        // Chunks stored while embedding was failing are only reachable by keyword.
        let by_keyword = self.store.keyword_search_unembedded(query, self.k).await?;
        Ok(interleave(by_vector, by_keyword, self.k))
    }
}

/// Alternate between two disjoint rankings, `first` leading, up to `k` hits.
fn interleave(first: Vec<ScoredChunk>, second: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    let mut merged = Vec::with_capacity(k.min(first.len() + second.len()));
    let mut first = first.into_iter();
    let mut second = second.into_iter();
    while merged.len() < k {
        match (first.next(), second.next()) {
            (None, None) => break,
            (a, b) => merged.extend(a.into_iter().chain(b)),
        }
    }
    merged.truncate(k);
    merged
}
