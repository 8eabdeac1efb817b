use crate::traits::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use synlogos_memory::Message;

/// Pre-programmed reply for [`ScriptedProvider`].
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Reply(ModelResponse),
    Error(ProviderError),
    /// Wait, then yield the inner response.
    Delay(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

impl From<ModelResponse> for ScriptedResponse {
    fn from(response: ModelResponse) -> Self {
        Self::Reply(response)
    }
}

/// Replays responses in order for deterministic runs without network
/// access. Every request's messages are recorded.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_replies(replies: Vec<ModelResponse>) -> Self {
        Self::new(replies.into_iter().map(ScriptedResponse::Reply).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<ModelResponse, ProviderError> {
        self.requests.lock().push(request.messages.to_vec());
        let next = self.responses.lock().pop_front();

        let mut current = next
            .ok_or_else(|| ProviderError::Parse("No scripted response left".to_string()))?;
        loop {
            match current {
                ScriptedResponse::Reply(response) => return Ok(response),
                ScriptedResponse::Error(error) => return Err(error),
                ScriptedResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    current = *inner;
                }
            }
        }
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}
