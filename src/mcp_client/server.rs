//! The capability server port.
//!
//! The routing table is built purely from this interface, so an in-process
//! stub, a stdio subprocess or a network service all attach the same way.

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::McpError;
use super::types::{CallOutcome, OperationDescriptor, ServerSpec, ServerState};

/// One attached capability server.
#[async_trait]
pub trait CapabilityServer: Send + Sync {
    /// Server name, unique within one manager.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> ServerState;

    /// Enumerate the operations this server exposes.
    async fn list_operations(&self) -> Result<Vec<OperationDescriptor>, McpError>;

    /// Invoke one operation.
    ///
    /// `Ok(CallOutcome::Error)` means the server answered with an error; `Err`
    /// means the call never got an answer (closed channel, timeout).
    async fn invoke(
        &self,
        operation: &str,
        arguments: serde_json::Value,
    ) -> Result<CallOutcome, McpError>;

    /// Read a resource by URI.
    async fn read_resource(&self, uri: &str) -> Result<serde_json::Value, McpError>;

    /// Release the server. Calling this more than once is a no-op.
    async fn close(&self) -> Result<(), McpError>;
}

/// Starts servers from launch specs.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    /// Start one server and return it in the `Ready` state.
    async fn launch(&self, spec: &ServerSpec) -> Result<Arc<dyn CapabilityServer>, McpError>;
}
