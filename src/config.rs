use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub labeling: LabelingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
}

/// Where tenant locations live. Every location is `<prefix><tenant_id>`.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_dataset_prefix")]
    pub dataset_prefix: String,
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,
    /// `sqlite` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dataset_prefix: default_dataset_prefix(),
            index_prefix: default_index_prefix(),
            staging_prefix: default_staging_prefix(),
            backend: default_backend(),
        }
    }
}

fn default_dataset_prefix() -> String {
    "data/dataset_".to_string()
}
fn default_index_prefix() -> String {
    "data/index_".to_string()
}
fn default_staging_prefix() -> String {
    "data/staging_".to_string()
}
fn default_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    tenant_rag_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    tenant_rag_core::chunk::DEFAULT_CHUNK_OVERLAP
}

impl ChunkingConfig {
    pub fn params(&self) -> tenant_rag_core::chunk::ChunkParams {
        tenant_rag_core::chunk::ChunkParams {
            size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelingConfig {
    /// `completion` (ask the completion service) or `disabled`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_label_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Added to a chunk's word count to estimate the tokens of one call.
    #[serde(default = "default_token_overhead")]
    pub token_overhead: u64,
    #[serde(default = "default_max_label_chars")]
    pub max_label_chars: usize,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            batch_size: default_label_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            token_overhead: default_token_overhead(),
            max_label_chars: default_max_label_chars(),
        }
    }
}

impl LabelingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_label_batch_size() -> usize {
    10
}
fn default_batch_delay_ms() -> u64 {
    1000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_token_overhead() -> u64 {
    50
}
fn default_max_label_chars() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests_per_minute: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_minute: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: default_max_requests(),
            max_tokens_per_minute: default_max_tokens(),
        }
    }
}

fn default_max_requests() -> usize {
    60
}
fn default_max_tokens() -> u64 {
    60_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            batch_size: default_embed_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embed_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    /// `openai`, `ollama` or `disabled`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            temperature: default_temperature(),
            timeout_secs: default_completion_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_temperature() -> f32 {
    0.2
}
fn default_completion_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

fn default_max_history() -> usize {
    tenant_rag_core::prompt::DEFAULT_MAX_HISTORY
}

impl Config {
    /// Defaults for every section. Used when no config file exists and by tests.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// All locations rooted under `root`, with the in-file defaults otherwise.
    pub fn rooted_at(root: &Path) -> Self {
        let mut config = Self::minimal();
        config.storage.dataset_prefix = format!("{}/dataset_", root.display());
        config.storage.index_prefix = format!("{}/index_", root.display());
        config.storage.staging_prefix = format!("{}/staging_", root.display());
        config
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate storage
    let prefixes = [
        ("dataset_prefix", &config.storage.dataset_prefix),
        ("index_prefix", &config.storage.index_prefix),
        ("staging_prefix", &config.storage.staging_prefix),
    ];
    for (name, value) in prefixes {
        if value.trim().is_empty() {
            anyhow::bail!("storage.{} must not be empty", name);
        }
    }
    for (i, (a_name, a)) in prefixes.iter().enumerate() {
        for (b_name, b) in prefixes.iter().skip(i + 1) {
            // One prefix extending another would let a tenant id land in a
            // location of a different kind.
            if a.starts_with(b.as_str()) || b.starts_with(a.as_str()) {
                anyhow::bail!("storage.{} and storage.{} must not overlap", a_name, b_name);
            }
        }
    }
    match config.storage.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate labeling
    match config.labeling.provider.as_str() {
        "disabled" => {}
        "completion" => {
            if !config.completion.is_enabled() {
                anyhow::bail!("labeling.provider = 'completion' requires a [completion] provider");
            }
        }
        other => anyhow::bail!(
            "Unknown labeling provider: '{}'. Must be disabled or completion.",
            other
        ),
    }
    if config.labeling.batch_size == 0 {
        anyhow::bail!("labeling.batch_size must be > 0");
    }
    if config.labeling.max_attempts == 0 {
        anyhow::bail!("labeling.max_attempts must be > 0");
    }
    if config.labeling.max_label_chars == 0 {
        anyhow::bail!("labeling.max_label_chars must be > 0");
    }

    // Validate rate limit
    if config.rate_limit.max_requests_per_minute == 0 {
        anyhow::bail!("rate_limit.max_requests_per_minute must be > 0");
    }
    if config.rate_limit.max_tokens_per_minute == 0 {
        anyhow::bail!("rate_limit.max_tokens_per_minute must be > 0");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Validate completion
    match config.completion.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.completion.model.is_none() {
                anyhow::bail!(
                    "completion.model must be specified when provider is '{}'",
                    config.completion.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.completion.temperature) {
        anyhow::bail!("completion.temperature must be in [0.0, 2.0]");
    }

    // Validate conversation
    if config.conversation.max_history == 0 {
        anyhow::bail!("conversation.max_history must be > 0");
    }

    Ok(())
}
