//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests with the operation catalog as
//! function tools and maps the reply to a [`ReasoningReply`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;

use super::config::ReasoningConfig;
use super::errors::InferenceError;
use super::service::ReasoningService;
use super::tool_call_parser::parse_tool_call;
use super::types::{
    ChatCompletionRequest, ChatMessage, ReasoningReply, ReasoningRequest, Role, ToolCallResponse,
    Turn,
};

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Base delay between retries; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Client for the reasoning model endpoint.
pub struct InferenceClient {
    http: HttpClient,
    config: ReasoningConfig,
}

impl InferenceClient {
    /// Build the client. Does NOT check connectivity; that happens on the
    /// first request.
    pub fn from_config(config: ReasoningConfig) -> Result<Self, InferenceError> {
        if config.model.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "reasoning.model must not be empty".into(),
            });
        }

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send one chat completion request.
    pub async fn chat_completion(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<ReasoningReply, InferenceError> {
        let url = self.config.completions_url();

        tracing::debug!(
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "sending chat completion"
        );

        let mut request = self.http.post(&url).json(body);
        if let Some(token) = self.config.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.config.request_timeout_secs,
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::ResponseParseError {
                reason: format!("failed to read response body: {e}"),
            })?;

        parse_completion_response(&body_text)
    }
}

#[async_trait]
impl ReasoningService for InferenceClient {
    async fn reason(&self, request: ReasoningRequest<'_>) -> Result<ReasoningReply, InferenceError> {
        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: build_messages(&request),
            tools: (!request.catalog.is_empty()).then(|| request.catalog.to_vec()),
            tool_choice: (!request.catalog.is_empty()).then(|| "auto".to_string()),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let mut attempt = 0;
        loop {
            match self.chat_completion(&body).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "reasoning call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Render the session as chat messages: system prompt, the scenario, then
/// each turn as an assistant message or a run of tool messages.
pub fn build_messages(request: &ReasoningRequest<'_>) -> Vec<ChatMessage> {
    let mut messages = vec![
        ChatMessage::text(Role::System, request.system_prompt),
        ChatMessage::text(Role::User, request.scenario),
    ];

    for turn in request.turns {
        match turn {
            Turn::Reasoning { text, calls } => messages.push(ChatMessage {
                role: Role::Assistant,
                content: text.clone(),
                tool_call_id: None,
                tool_calls: Some(calls.iter().map(ToolCallResponse::from).collect()),
            }),
            Turn::Results { results } => {
                messages.extend(results.iter().map(|r| ChatMessage {
                    role: Role::Tool,
                    content: Some(r.content.clone()),
                    tool_call_id: Some(r.call_id.clone()),
                    tool_calls: None,
                }));
            }
        }
    }

    messages
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Deserialize)]
struct CompletionToolCall {
    id: Option<String>,
    function: CompletionFunction,
}

#[derive(Deserialize)]
struct CompletionFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Map a chat completion body to a reply. Tool calls win over content; a
/// reply with neither is a `Final` with empty text.
pub fn parse_completion_response(body: &str) -> Result<ReasoningReply, InferenceError> {
    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::ResponseParseError {
            reason: format!("invalid completion body: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::ResponseParseError {
            reason: "empty choices array".into(),
        })?;

    let text = choice.message.content.filter(|c| !c.trim().is_empty());

    let calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .iter()
        .map(|tc| parse_tool_call(tc.id.as_deref(), &tc.function.name, &tc.function.arguments))
        .collect::<Result<Vec<_>, _>>()?;

    if calls.is_empty() {
        Ok(ReasoningReply::Final {
            text: text.unwrap_or_default(),
        })
    } else {
        Ok(ReasoningReply::Operations { text, calls })
    }
}
