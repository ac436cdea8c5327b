//! Shared types for the connection manager.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures, launch specs and the
//! operation descriptors that make up the routing table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

// ─── Launch Specs ────────────────────────────────────────────────────────────

/// How to start one capability server process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the child process.
    #[serde(default)]
    pub cwd: Option<String>,
}

/// A named launch spec, as produced by the region composer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub name: String,
    #[serde(flatten)]
    pub launch: LaunchSpec,
}

impl ServerSpec {
    pub fn new(name: &str, launch: LaunchSpec) -> Self {
        Self {
            name: name.to_string(),
            launch,
        }
    }
}

/// Lifecycle state of a capability server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Unstarted,
    Connecting,
    Ready,
    Failed,
    Closed,
}

// ─── Operations ──────────────────────────────────────────────────────────────

/// One named, schema-described callable unit exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: serde_json::Value,
    #[serde(default, alias = "outputSchema")]
    pub output_schema: serde_json::Value,
    /// Owning server name. Filled in by the manager, not by the server.
    #[serde(default)]
    pub server: String,
}

/// Outcome of a routed call: either content or an error string from the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Content(serde_json::Value),
    Error(String),
}

impl CallOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, CallOutcome::Error(_))
    }

    /// Build an outcome from an MCP `tools/call` result.
    ///
    /// MCP results look like `{ "content": [{ "type": "text", "text": "..." }], "isError": false }`.
    /// Text blocks are joined; if the joined text is itself JSON it is parsed so
    /// callers see structured content. Results without a content array are
    /// passed through unchanged.
    pub fn from_mcp_result(result: serde_json::Value) -> Self {
        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let texts: Option<Vec<&str>> = result
            .get("content")
            .and_then(|c| c.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                    .collect()
            });

        match texts {
            Some(texts) if !texts.is_empty() => {
                let joined = texts.join("\n");
                if is_error {
                    CallOutcome::Error(joined)
                } else {
                    let value = serde_json::from_str(&joined)
                        .unwrap_or(serde_json::Value::String(joined));
                    CallOutcome::Content(value)
                }
            }
            _ if is_error => CallOutcome::Error("operation reported an error".into()),
            _ => CallOutcome::Content(result),
        }
    }
}

/// Result of one dispatched operation, as fed back to the reasoning loop.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub operation: String,
    pub success: bool,
    pub content: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub cached: bool,
}

/// MCP `initialize` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// MCP `tools/list` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<OperationDescriptor>,
}

/// The MCP protocol revision sent during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_json_rpc_error_response() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 2,
            "result": null,
            "error": {"code": -32601, "message": "Method not found"}
        }"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_operation_descriptor_accepts_mcp_casing() {
        let json = r#"{
            "name": "search_bnf_drugs",
            "description": "Search the BNF",
            "inputSchema": {"type": "object", "required": ["name"]}
        }"#;
        let op: OperationDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(op.input_schema["required"][0], "name");
        assert!(op.server.is_empty());
    }

    #[test]
    fn test_server_spec_flattens_launch() {
        let yaml = "name: bnf_drugs\ncommand: python3\nargs: [\"-m\", \"bnf\"]\n";
        let spec: ServerSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.name, "bnf_drugs");
        assert_eq!(spec.launch.command, "python3");
        assert_eq!(spec.launch.args.len(), 2);
    }

    #[test]
    fn test_outcome_from_mcp_text_json() {
        let result = serde_json::json!({
            "content": [{"type": "text", "text": "{\"results\": [{\"id\": \"amox\"}]}"}]
        });
        match CallOutcome::from_mcp_result(result) {
            CallOutcome::Content(v) => assert_eq!(v["results"][0]["id"], "amox"),
            other => panic!("expected content, got {other:?}"),
        }
    }

    #[test]
    fn test_outcome_from_mcp_plain_text() {
        let result = serde_json::json!({
            "content": [{"type": "text", "text": "first"}, {"type": "text", "text": "second"}]
        });
        assert_eq!(
            CallOutcome::from_mcp_result(result),
            CallOutcome::Content(serde_json::json!("first\nsecond"))
        );
    }

    #[test]
    fn test_outcome_from_mcp_error_flag() {
        let result = serde_json::json!({
            "content": [{"type": "text", "text": "guideline not found"}],
            "isError": true
        });
        assert_eq!(
            CallOutcome::from_mcp_result(result),
            CallOutcome::Error("guideline not found".into())
        );
    }

    #[test]
    fn test_outcome_passthrough_without_content() {
        let result = serde_json::json!({"drug": "amoxicillin"});
        assert_eq!(
            CallOutcome::from_mcp_result(result.clone()),
            CallOutcome::Content(result)
        );
    }
}
