//! Shared types for the reasoning service.
//!
//! The conversation model (`Turn`, `ReasoningRequest`, `ReasoningReply`) is
//! what the agent loop sees. The chat-completion types below it mirror the
//! OpenAI API and are only used by the HTTP client.

use serde::{Deserialize, Serialize};

// ─── Conversation Model ──────────────────────────────────────────────────────

/// An operation call requested by the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this call (generated if the model doesn't provide one).
    pub id: String,
    /// Operation name, e.g. `"search_nice_guidelines"`.
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The result of one requested call, fed back on the next turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    pub operation: String,
    /// Rendered (and possibly truncated) result text.
    pub content: String,
    pub is_error: bool,
}

/// One entry in the session's turn log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    /// Output of the reasoning service that requested operations.
    Reasoning {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
    /// The combined results for the preceding reasoning turn.
    Results { results: Vec<ToolResult> },
}

/// Everything the reasoning service gets for one call.
#[derive(Debug, Clone, Copy)]
pub struct ReasoningRequest<'a> {
    pub system_prompt: &'a str,
    pub scenario: &'a str,
    pub turns: &'a [Turn],
    /// Operation catalog in OpenAI function-calling format.
    pub catalog: &'a [serde_json::Value],
}

/// What the reasoning service answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningReply {
    /// A final document to be parsed as a structured answer.
    Final { text: String },
    /// A request to invoke operations before continuing.
    Operations {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
}

// ─── Chat Completion Types ───────────────────────────────────────────────────

/// A single message in the conversation.
///
/// `content` serializes as `""` rather than `null`; several OpenAI-compatible
/// runtimes reject `null` content on assistant messages with tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(serialize_with = "serialize_content")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
}

impl ChatMessage {
    pub fn text(role: Role, content: &str) -> Self {
        Self {
            role,
            content: Some(content.to_string()),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

fn serialize_content<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(value.as_deref().unwrap_or(""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

/// Tool call as carried in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCallResponse,
}

/// Function call details; `arguments` is a JSON-encoded string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub name: String,
    pub arguments: String,
}

impl From<&ToolCall> for ToolCallResponse {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            r#type: "function".into(),
            function: FunctionCallResponse {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_content_serializes_as_empty_string() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: None,
            tool_call_id: None,
            tool_calls: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_tool_call_response_encodes_arguments() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "get_bnf_drug".into(),
            arguments: serde_json::json!({"drug_id": "amox"}),
        };
        let resp = ToolCallResponse::from(&call);
        assert_eq!(resp.r#type, "function");
        let args: serde_json::Value = serde_json::from_str(&resp.function.arguments).unwrap();
        assert_eq!(args["drug_id"], "amox");
    }

    #[test]
    fn test_turn_serialization_is_tagged() {
        let turn = Turn::Results { results: vec![] };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["kind"], "results");
    }
}
