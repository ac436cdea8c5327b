//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with capability server child processes:
//! - Writing JSON-RPC requests to stdin
//! - Reading JSON-RPC responses from stdout
//! - Line-delimited JSON protocol (one JSON object per line)
//!
//! The channel is private to one server process. A request holds the channel
//! lock from write until its matching response is read, so concurrent callers
//! on the same server are serialized rather than interleaved.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::types::{JsonRpcRequest, JsonRpcResponse};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncBufRead + Send + Unpin>;

struct Channel {
    writer: BoxedWriter,
    reader: BoxedReader,
}

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    server_name: String,
    channel: Mutex<Channel>,
    closed: AtomicBool,
}

impl StdioTransport {
    /// Create a new transport from a child process's stdin/stdout.
    pub fn new(server_name: &str, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self::from_io(server_name, stdin, BufReader::new(stdout))
    }

    /// Create a transport over arbitrary async I/O halves.
    pub fn from_io<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            channel: Mutex::new(Channel {
                writer: Box::new(writer),
                reader: Box::new(reader),
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether the server's stdout has reached EOF.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the channel closed (e.g. after shutdown).
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn unreachable(&self, reason: &str) -> McpError {
        McpError::Unreachable {
            name: self.server_name.clone(),
            reason: reason.to_string(),
        }
    }

    /// Send a JSON-RPC request and wait for the matching response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        if self.is_closed() {
            return Err(self.unreachable("channel closed"));
        }

        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let mut json = serde_json::to_string(&req).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        json.push('\n');

        let mut channel = self.channel.lock().await;

        if let Err(e) = write_line(&mut channel.writer, &json).await {
            self.mark_closed();
            return Err(self.unreachable(&format!("failed to write to stdin: {e}")));
        }

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = channel
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| McpError::TransportError {
                    server: self.server_name.clone(),
                    reason: format!("failed to read from stdout: {e}"),
                })?;

            if bytes_read == 0 {
                self.mark_closed();
                return Err(self.unreachable("server stdout closed (process may have exited)"));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            // Anything that is not our response (log lines, notifications,
            // stale replies) is skipped.
            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == id => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(
                        server = %self.server_name,
                        expected = id,
                        got = resp.id,
                        "skipping response for a different request"
                    );
                }
                Err(_) => {
                    tracing::trace!(server = %self.server_name, line = trimmed, "non-JSON-RPC stdout line");
                }
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(self.unreachable("channel closed"));
        }

        let notification = match params {
            Some(p) => serde_json::json!({ "jsonrpc": "2.0", "method": method, "params": p }),
            None => serde_json::json!({ "jsonrpc": "2.0", "method": method }),
        };

        let mut json = serde_json::to_string(&notification).map_err(|e| {
            McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to serialize notification: {e}"),
            }
        })?;
        json.push('\n');

        let mut channel = self.channel.lock().await;
        write_line(&mut channel.writer, &json)
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write notification: {e}"),
            })
    }
}

async fn write_line(writer: &mut BoxedWriter, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, BufReader as TokioBufReader};

    #[test]
    fn test_next_request_id_is_monotonic() {
        let id1 = next_request_id();
        let id2 = next_request_id();
        assert!(id2 > id1);
    }

    #[test]
    fn test_extract_result_error() {
        let resp = JsonRpcResponse {
            id: 1,
            result: None,
            error: Some(super::super::types::JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            }),
        };
        match extract_result(resp).unwrap_err() {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_result_missing_both() {
        let resp = JsonRpcResponse {
            id: 1,
            result: None,
            error: None,
        };
        assert!(matches!(
            extract_result(resp).unwrap_err(),
            McpError::ServerError { .. }
        ));
    }

    /// Echo server: answers every request with `{"echo": <method>}`, after
    /// first printing a log line that the transport must skip.
    async fn run_echo_server(
        server_in: tokio::io::DuplexStream,
        mut server_out: tokio::io::DuplexStream,
    ) {
        let mut reader = TokioBufReader::new(server_in);
        let mut line = String::new();
        while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
            let req: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
            if let Some(id) = req.get("id") {
                let reply = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"echo": req["method"]}
                });
                let out = format!("starting up...\n{reply}\n");
                server_out.write_all(out.as_bytes()).await.unwrap();
            }
            line.clear();
        }
    }

    #[tokio::test]
    async fn test_request_skips_log_lines_and_matches_id() {
        let (client_w, server_r) = duplex(4096);
        let (server_w, client_r) = duplex(4096);
        tokio::spawn(run_echo_server(server_r, server_w));

        let transport = StdioTransport::from_io("echo", client_w, TokioBufReader::new(client_r));
        let resp = transport.request("tools/list", None).await.unwrap();
        let result = extract_result(resp).unwrap();
        assert_eq!(result["echo"], "tools/list");
    }

    #[tokio::test]
    async fn test_eof_marks_transport_closed() {
        let (client_w, mut server_r) = duplex(4096);
        let (server_w, client_r) = duplex(4096);
        drop(server_w);

        let transport = StdioTransport::from_io("gone", client_w, TokioBufReader::new(client_r));
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, McpError::Unreachable { .. }));
        assert!(transport.is_closed());

        // Subsequent requests fail fast without touching the channel.
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, McpError::Unreachable { .. }));
        drop(transport);

        let mut sent = String::new();
        let _ = server_r.read_to_string(&mut sent).await;
        assert_eq!(sent.lines().count(), 1);
    }
}
