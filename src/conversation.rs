//! Question answering over a tenant's index.
//!
//! Retrieve the top-k chunks, render them with recent history into one
//! prompt, and return the completion text unchanged. Nothing is cached
//! between calls.

use std::sync::Arc;

use anyhow::Result;

use tenant_rag_core::models::{ChatMessage, Exchange};
use tenant_rag_core::prompt::{format_history, history_from_messages, join_context, render_prompt};

use crate::completion::CompletionProvider;
use crate::error::RagError;
use crate::registry::TenantRegistry;

pub struct ConversationPipeline {
    registry: Arc<TenantRegistry>,
    completion: Arc<dyn CompletionProvider>,
    max_history: usize,
}

impl ConversationPipeline {
    /// Uses the registry's completion service.
    pub fn new(registry: Arc<TenantRegistry>, max_history: usize) -> Self {
        let completion = registry.services().completion.clone();
        Self::with_completion(registry, completion, max_history)
    }

    pub fn with_completion(
        registry: Arc<TenantRegistry>,
        completion: Arc<dyn CompletionProvider>,
        max_history: usize,
    ) -> Self {
        Self {
            registry,
            completion,
            max_history,
        }
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    /// The prompt `answer` would send for this question.
    pub async fn build_prompt(
        &self,
        tenant_id: &str,
        query: &str,
        history: &[Exchange],
    ) -> Result<String> {
        let index = self.registry.get_or_create(tenant_id)?;
        let retriever = index.retriever().await?;
        let chunks = retriever.search(query).await?;
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        tracing::debug!(tenant = %tenant_id, chunks = chunks.len(), "retrieved context");
        Ok(render_prompt(
            &join_context(&texts),
            &format_history(history, self.max_history),
            query,
        ))
    }

    pub async fn answer(
        &self,
        tenant_id: &str,
        query: &str,
        history: &[Exchange],
    ) -> Result<String> {
        let prompt = self.build_prompt(tenant_id, query, history).await?;
        let answer = self.completion.complete(&prompt).await?;
        tracing::info!(
            tenant = %tenant_id,
            model = self.completion.model_name(),
            history = history.len().min(self.max_history),
            "answered query"
        );
        Ok(answer)
    }

    /// Answer the last message of a role-tagged transcript.
    pub async fn answer_messages(&self, tenant_id: &str, messages: &[ChatMessage]) -> Result<String> {
        let (history, query) = history_from_messages(messages).ok_or(RagError::NoMessages)?;
        self.answer(tenant_id, &query, &history).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every prompt and answers with a fixed string.
    struct EchoCompletion {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionProvider for EchoCompletion {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("We open at nine.".to_string())
        }
    }

    fn pipeline(root: &std::path::Path) -> (ConversationPipeline, Arc<EchoCompletion>) {
        let mut config = Config::rooted_at(root);
        config.storage.backend = "memory".to_string();
        let registry = Arc::new(TenantRegistry::new(&config).unwrap());
        let completion = Arc::new(EchoCompletion {
            prompts: Mutex::new(Vec::new()),
        });
        (
            ConversationPipeline::with_completion(registry, completion.clone(), 10),
            completion,
        )
    }

    #[tokio::test]
    async fn test_answer_uses_retrieved_context() {
        let tmp = TempDir::new().unwrap();
        let dataset = tmp.path().join("dataset_t1");
        std::fs::create_dir_all(&dataset).unwrap();
        std::fs::write(dataset.join("hours.txt"), "The library opens at nine every weekday.").unwrap();
        let (pipeline, completion) = pipeline(tmp.path());

        let answer = pipeline.answer("t1", "When does the library open?", &[]).await.unwrap();
        assert_eq!(answer, "We open at nine.");

        let prompts = completion.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Context:\nThe library opens at nine every weekday."));
        assert!(prompts[0].contains("Conversation so far:\n\n"));
        assert!(prompts[0].ends_with("Question: When does the library open?\nAnswer:"));
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("dataset_t1")).unwrap();
        let (pipeline, completion) = pipeline(tmp.path());
        let history: Vec<Exchange> = (0..12)
            .map(|i| Exchange::new(format!("q{}", i), format!("a{}", i)))
            .collect();

        pipeline.answer("t1", "next", &history).await.unwrap();

        let prompts = completion.prompts.lock().unwrap();
        assert!(!prompts[0].contains("Human: q1\n"));
        assert!(prompts[0].contains("Human: q2\nAssistant: a2"));
        assert!(prompts[0].contains("Human: q11\nAssistant: a11"));
    }

    #[tokio::test]
    async fn test_missing_dataset_is_typed_error() {
        let tmp = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(tmp.path());
        let err = pipeline.answer("ghost", "hi", &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::DirectoryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_transcript() {
        let tmp = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(tmp.path());
        let err = pipeline.answer_messages("t1", &[]).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<RagError>(), Some(RagError::NoMessages)));
    }
}
