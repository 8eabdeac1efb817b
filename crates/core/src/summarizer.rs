use async_trait::async_trait;
use std::time::Duration;
use synlogos_memory::{CompactionError, ContextManager, Message, Summarizer};
use synlogos_providers::{CompletionRequest, ModelProvider};
use tracing::debug;

const SUMMARIZER_PROMPT: &str =
    "You compress conversations between a user and a coding agent. Reply with the summary only.";

/// Summarizes a compacted prefix with one tool-less model call.
pub struct ProviderSummarizer<'a> {
    provider: &'a dyn ModelProvider,
    timeout: Duration,
}

impl<'a> ProviderSummarizer<'a> {
    pub fn new(provider: &'a dyn ModelProvider, timeout: Duration) -> Self {
        Self { provider, timeout }
    }
}

#[async_trait]
impl Summarizer for ProviderSummarizer<'_> {
    async fn summarize(&self, messages: &[Message]) -> Result<String, CompactionError> {
        let request = [
            Message::system(SUMMARIZER_PROMPT),
            Message::user(ContextManager::summary_request(messages)),
        ];
        debug!("Requesting summary of {} messages", messages.len());

        let response = tokio::time::timeout(
            self.timeout,
            self.provider.complete(CompletionRequest::new(&request, &[])),
        )
        .await
        .map_err(|_| CompactionError::Summarizer(format!("timed out after {:?}", self.timeout)))?
        .map_err(|e| CompactionError::Summarizer(e.to_string()))?;

        let text = response.text.trim();
        if text.is_empty() {
            return Err(CompactionError::Summarizer("empty summary".to_string()));
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use synlogos_providers::{ModelResponse, ProviderError, ScriptedProvider, ScriptedResponse};

    #[tokio::test]
    async fn test_summarizes_without_tools() {
        let provider = ScriptedProvider::from_replies(vec![ModelResponse::text(" user asked for X ")]);
        let summarizer = ProviderSummarizer::new(&provider, Duration::from_secs(5));
        let summary = summarizer
            .summarize(&[Message::user("please do X")])
            .await
            .unwrap();
        assert_eq!(summary, "user asked for X");

        let requests = provider.requests();
        assert_eq!(requests[0].len(), 2);
        assert!(requests[0][1].content.contains("please do X"));
    }

    #[tokio::test]
    async fn test_failures_map_to_summarizer_error() {
        let provider = ScriptedProvider::new(vec![
            ScriptedResponse::Error(ProviderError::Network("reset".into())),
            ModelResponse::text("  ").into(),
        ]);
        let summarizer = ProviderSummarizer::new(&provider, Duration::from_secs(5));
        let messages = [Message::user("x")];
        assert!(matches!(
            summarizer.summarize(&messages).await,
            Err(CompactionError::Summarizer(_))
        ));
        assert!(matches!(
            summarizer.summarize(&messages).await,
            Err(CompactionError::Summarizer(_))
        ));
    }
}
