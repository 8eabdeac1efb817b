use crate::arguments::clean_tool_arguments;
use crate::traits::*;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use synlogos_memory::{Message, Role};
use synlogos_tools::ToolCall;
use tracing::debug;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    id: Option<String>,
    function: OpenAIFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI format.
pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: Option<f32>,
    timeout: Duration,
}

impl OpenAICompatibleProvider {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Result<Self, ProviderError> {
        Self::with_timeout(base_url, api_key, model, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature: None,
            timeout,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Converts transcript messages to the OpenAI wire format. Tool replies
/// without a call id are sent as user messages since the API rejects
/// unpaired tool messages.
pub fn to_openai_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::Tool => match &msg.tool_call_id {
                Some(id) => json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": msg.content,
                }),
                None => json!({
                    "role": "user",
                    "content": format!("[tool result]\n{}", msg.content),
                }),
            },
            Role::Assistant if !msg.tool_calls.is_empty() => {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": Value::Object(call.arguments.clone()).to_string(),
                            }
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": if msg.content.is_empty() { Value::Null } else { json!(msg.content) },
                    "tool_calls": calls,
                })
            }
            role => json!({
                "role": role.to_string(),
                "content": msg.content,
            }),
        })
        .collect()
}

fn classify_status(status: StatusCode, body: String) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(body),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(body),
        _ => ProviderError::Api {
            status: status.as_u16(),
            message: body,
        },
    }
}

fn parse_response(response: OpenAIResponse) -> Result<ModelResponse, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(index, call)| {
            ToolCall::new(
                call.id.unwrap_or_else(|| format!("call_{}", index)),
                call.function.name,
                clean_tool_arguments(&call.function.arguments),
            )
        })
        .collect();

    Ok(ModelResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage: response
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
        finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
    })
}

#[async_trait]
impl ModelProvider for OpenAICompatibleProvider {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<ModelResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = OpenAIRequest {
            model: &self.model,
            messages: to_openai_messages(request.messages),
            tools: (!request.tools.is_empty()).then_some(request.tools),
            temperature: self.temperature,
        };

        debug!(
            "POST {} ({} messages, {} tools)",
            url,
            request.messages.len(),
            request.tools.len()
        );

        let mut http = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            http = http.bearer_auth(api_key);
        }

        let response = http.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let parsed: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_response(parsed)
    }

    fn name(&self) -> &str {
        "OpenAI Compatible"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_message_conversion() {
        let call = ToolCall::new(
            "call_1",
            "read_file",
            json!({"path": "a.txt"}).as_object().cloned().unwrap(),
        );
        let messages = vec![
            Message::system("sys"),
            Message::assistant("", vec![call]),
            Message::tool(Some("call_1".into()), "contents"),
            Message::tool(None, "orchestration output"),
        ];
        let wire = to_openai_messages(&messages);

        assert_eq!(wire[0], json!({"role": "system", "content": "sys"}));
        assert_eq!(wire[1]["content"], Value::Null);
        assert_eq!(wire[1]["tool_calls"][0]["function"]["arguments"], "{\"path\":\"a.txt\"}");
        assert_eq!(wire[2]["tool_call_id"], "call_1");
        assert_eq!(wire[3]["role"], "user");
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "abc", "function": {"name": "shell", "arguments": "{\"command\": \"ls\"}"}},
                        {"function": {"name": "git_status", "arguments": ""}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let parsed: OpenAIResponse = serde_json::from_value(raw).unwrap();
        let response = parse_response(parsed).unwrap();

        assert_eq!(response.text, "");
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].id, "abc");
        assert_eq!(response.tool_calls[1].id, "call_1");
        assert!(response.tool_calls[1].arguments.is_empty());
        assert_eq!(response.usage, Some(Usage::new(12, 3)));
        assert_eq!(response.finish_reason, "tool_calls");
    }

    #[test]
    fn test_parse_response_without_choices() {
        let parsed: OpenAIResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(parse_response(parsed), Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "no".into()),
            ProviderError::Auth(_)
        ));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
    }
}
