//! Topic labeling of chunks through a rate-limited external service.
//!
//! Chunks are labeled one at a time in fixed-size batches, with a pause
//! between batches. Every attempt first takes its token estimate from the
//! shared [`RateLimiter`], then calls the [`Labeler`]. A chunk whose attempts
//! are exhausted gets [`UNLABELED`]; labeling never drops a chunk and never
//! fails the run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use tenant_rag_core::models::{Chunk, UNLABELED};

use crate::completion::CompletionProvider;
use crate::config::LabelingConfig;
use crate::rate_limit::RateLimiter;
use crate::retry::{self, RetryPolicy};

#[async_trait]
pub trait Labeler: Send + Sync {
    /// `false` means chunks are stored without any label.
    fn is_enabled(&self) -> bool {
        true
    }
    async fn label(&self, text: &str) -> Result<String>;
}

pub struct DisabledLabeler;

#[async_trait]
impl Labeler for DisabledLabeler {
    fn is_enabled(&self) -> bool {
        false
    }
    async fn label(&self, _text: &str) -> Result<String> {
        bail!("Labeling is disabled")
    }
}

/// Asks the completion service for a short topic label.
pub struct CompletionLabeler {
    completion: Arc<dyn CompletionProvider>,
    max_chars: usize,
}

impl CompletionLabeler {
    pub fn new(completion: Arc<dyn CompletionProvider>, max_chars: usize) -> Self {
        Self {
            completion,
            max_chars,
        }
    }
}

#[async_trait]
impl Labeler for CompletionLabeler {
    async fn label(&self, text: &str) -> Result<String> {
        let prompt = format!(
            "Give a short topic label, at most five words, for the text below. \
             Reply with the label only.\n\nText:\n{}",
            text
        );
        let raw = self.completion.complete(&prompt).await?;
        match clean_label(&raw, self.max_chars) {
            Some(label) => Ok(label),
            None => bail!("labeling service returned an empty label"),
        }
    }
}

pub fn create_labeler(
    config: &LabelingConfig,
    completion: Arc<dyn CompletionProvider>,
) -> Result<Arc<dyn Labeler>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLabeler)),
        "completion" => Ok(Arc::new(CompletionLabeler::new(
            completion,
            config.max_label_chars,
        ))),
        other => bail!("Unknown labeling provider: {}", other),
    }
}

/// First non-empty line, without surrounding quotes or markdown emphasis,
/// capped at `max_chars` characters.
pub fn clean_label(raw: &str, max_chars: usize) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .trim_start_matches("Label:")
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '*' | '`'))
        .trim();
    let label: String = line.chars().take(max_chars).collect();
    let label = label.trim_end().to_string();
    (!label.is_empty()).then_some(label)
}

/// Token cost of labeling `text`: its word count plus a fixed overhead.
pub fn estimate_tokens(text: &str, overhead: u64) -> u64 {
    text.split_whitespace().count() as u64 + overhead
}

#[derive(Debug, Clone, Copy)]
pub struct LabelingSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub token_overhead: u64,
    pub policy: RetryPolicy,
}

impl LabelingSettings {
    pub fn from_config(config: &LabelingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            token_overhead: config.token_overhead,
            policy: RetryPolicy::for_labeling(config),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelingReport {
    pub labeled: usize,
    pub unlabeled: usize,
}

/// One labeling run. Batch boundaries carry over between [`label`](Self::label)
/// calls, so labeling several files in one session paces them as one stream.
pub struct LabelingSession<'a> {
    labeler: &'a dyn Labeler,
    limiter: &'a RateLimiter,
    settings: LabelingSettings,
    in_batch: usize,
    report: LabelingReport,
}

impl<'a> LabelingSession<'a> {
    pub fn new(
        labeler: &'a dyn Labeler,
        limiter: &'a RateLimiter,
        settings: LabelingSettings,
    ) -> Self {
        Self {
            labeler,
            limiter,
            settings,
            in_batch: 0,
            report: LabelingReport::default(),
        }
    }

    /// Assign a label to every chunk, real or sentinel. Leaves labels
    /// untouched when the labeler is disabled.
    pub async fn label(&mut self, chunks: &mut [Chunk]) {
        if !self.labeler.is_enabled() {
            return;
        }
        for chunk in chunks.iter_mut() {
            self.pace().await;
            let label = self.label_one(chunk).await;
            chunk.label = Some(label);
        }
    }

    pub fn report(&self) -> LabelingReport {
        self.report
    }

    async fn pace(&mut self) {
        if self.in_batch == self.settings.batch_size {
            tracing::debug!(
                delay_ms = self.settings.batch_delay.as_millis() as u64,
                "batch done, pausing"
            );
            tokio::time::sleep(self.settings.batch_delay).await;
            self.in_batch = 0;
        }
        self.in_batch += 1;
    }

    /// Label a single chunk's text, falling back to [`UNLABELED`].
    pub async fn label_one(&mut self, chunk: &Chunk) -> String {
        let tokens = estimate_tokens(&chunk.text, self.settings.token_overhead);
        let labeler = self.labeler;
        let limiter = self.limiter;
        let text = chunk.text.as_str();

        let outcome = retry::attempt(&self.settings.policy, "label chunk", |_| async move {
            limiter.acquire(tokens).await;
            labeler.label(text).await
        })
        .await;

        match outcome {
            Ok(label) => {
                self.report.labeled += 1;
                label
            }
            Err(exhausted) => {
                tracing::warn!(
                    chunk = %chunk.id,
                    source = %chunk.source,
                    error = %exhausted,
                    "labeling failed, storing chunk as {}",
                    UNLABELED
                );
                self.report.unlabeled += 1;
                UNLABELED.to_string()
            }
        }
    }
}
