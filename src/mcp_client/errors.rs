//! Connection manager error types.

use thiserror::Error;

/// Errors that can occur while launching, routing to, or calling capability servers.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No server in the routing table owns this operation.
    #[error("unknown operation: '{name}'")]
    UnknownOperation {
        name: String,
        suggestions: Vec<String>,
    },

    /// An explicitly requested server is not attached to this manager.
    #[error("unknown server: '{name}'")]
    UnknownServer {
        name: String,
    },

    /// Two servers attached to one manager expose the same operation name.
    #[error("operation '{operation}' exposed by both '{first}' and '{second}'")]
    DuplicateOperation {
        operation: String,
        first: String,
        second: String,
    },

    /// The resolved server's channel has closed or it never became ready.
    #[error("server '{name}' is unreachable: {reason}")]
    Unreachable {
        name: String,
        reason: String,
    },

    /// Operation arguments failed the structural schema check.
    #[error("invalid arguments for '{operation}': {reason}")]
    InvalidArguments {
        operation: String,
        reason: String,
    },

    /// An operation call timed out.
    #[error("operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: String,
        timeout_ms: u64,
    },

    /// Configuration error (bad launch spec, missing server).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl McpError {
    /// Whether this error occurred while bringing a server up.
    ///
    /// Startup errors are fatal to a session; everything else is fed back to
    /// the reasoning loop as a tool-result error.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            McpError::SpawnFailed { .. }
                | McpError::InitFailed { .. }
                | McpError::DuplicateOperation { .. }
                | McpError::ConfigError { .. }
        )
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }
}
