//! In-process capability servers.
//!
//! `StubServer` implements [`CapabilityServer`] without a subprocess: each
//! operation is answered by a handler closure. Used as a test double and for
//! wiring the pipeline without real capability servers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::errors::McpError;
use super::server::{CapabilityServer, ServerLauncher};
use super::types::{CallOutcome, OperationDescriptor, ServerSpec, ServerState};

type Handler = Arc<dyn Fn(&serde_json::Value) -> Result<CallOutcome, McpError> + Send + Sync>;

struct StubShared {
    state: Mutex<ServerState>,
    calls: AtomicUsize,
    closes: AtomicUsize,
    closed: AtomicBool,
}

/// An in-process server answering from handler closures.
///
/// Clones share runtime state (call counts, closed flag), so a test can keep
/// a handle to a server it handed to a launcher and inspect it afterwards.
#[derive(Clone)]
pub struct StubServer {
    name: String,
    operations: Vec<OperationDescriptor>,
    handlers: HashMap<String, Handler>,
    resources: HashMap<String, serde_json::Value>,
    fail_listing: bool,
    delay: Option<Duration>,
    shared: Arc<StubShared>,
}

impl StubServer {
    /// A ready server exposing `operations`. Unconfigured operations echo
    /// `{server, operation, arguments}` back.
    pub fn new(name: &str, operations: &[&str]) -> Self {
        let operations = operations
            .iter()
            .map(|op| OperationDescriptor {
                name: op.to_string(),
                description: format!("{op} (stub)"),
                input_schema: serde_json::json!({ "type": "object" }),
                output_schema: serde_json::Value::Null,
                server: String::new(),
            })
            .collect();

        Self {
            name: name.to_string(),
            operations,
            handlers: HashMap::new(),
            resources: HashMap::new(),
            fail_listing: false,
            delay: None,
            shared: Arc::new(StubShared {
                state: Mutex::new(ServerState::Ready),
                calls: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Answer `operation` with a handler.
    pub fn with_handler<F>(mut self, operation: &str, handler: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<CallOutcome, McpError> + Send + Sync + 'static,
    {
        self.handlers.insert(operation.to_string(), Arc::new(handler));
        self
    }

    /// Answer `operation` with a fixed payload.
    pub fn with_reply(self, operation: &str, payload: serde_json::Value) -> Self {
        self.with_handler(operation, move |_| Ok(CallOutcome::Content(payload.clone())))
    }

    /// Answer `operation` with a server-side error.
    pub fn with_error(self, operation: &str, message: &str) -> Self {
        let message = message.to_string();
        self.with_handler(operation, move |_| Ok(CallOutcome::Error(message.clone())))
    }

    /// Set the input schema advertised for `operation`.
    pub fn with_schema(mut self, operation: &str, schema: serde_json::Value) -> Self {
        if let Some(op) = self.operations.iter_mut().find(|op| op.name == operation) {
            op.input_schema = schema;
        }
        self
    }

    /// Serve `value` for `uri` from `read_resource`.
    pub fn with_resource(mut self, uri: &str, value: serde_json::Value) -> Self {
        self.resources.insert(uri.to_string(), value);
        self
    }

    /// Make `list_operations` fail.
    pub fn failing_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// Sleep for `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `invoke` calls received.
    pub fn call_count(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }

    /// Number of `close` calls that actually released the server.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ServerState) {
        let mut guard = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = state;
    }

    fn ensure_open(&self) -> Result<(), McpError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(McpError::Unreachable {
                name: self.name.clone(),
                reason: "channel closed".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CapabilityServer for StubServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ServerState {
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn list_operations(&self) -> Result<Vec<OperationDescriptor>, McpError> {
        self.ensure_open()?;
        if self.fail_listing {
            return Err(McpError::ServerError {
                code: super::types::error_codes::METHOD_NOT_FOUND,
                message: "tools/list not supported".into(),
                data: None,
            });
        }
        Ok(self.operations.clone())
    }

    async fn invoke(
        &self,
        operation: &str,
        arguments: serde_json::Value,
    ) -> Result<CallOutcome, McpError> {
        self.ensure_open()?;
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(handler) = self.handlers.get(operation) {
            return handler(&arguments);
        }
        if self.operations.iter().any(|op| op.name == operation) {
            return Ok(CallOutcome::Content(serde_json::json!({
                "server": self.name,
                "operation": operation,
                "arguments": arguments,
            })));
        }
        Ok(CallOutcome::Error(format!("unknown tool: {operation}")))
    }

    async fn read_resource(&self, uri: &str) -> Result<serde_json::Value, McpError> {
        self.ensure_open()?;
        self.resources
            .get(uri)
            .cloned()
            .ok_or_else(|| McpError::ServerError {
                code: super::types::error_codes::INVALID_PARAMS,
                message: format!("resource not found: {uri}"),
                data: None,
            })
    }

    async fn close(&self) -> Result<(), McpError> {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.set_state(ServerState::Closed);
        Ok(())
    }
}

/// Launcher that hands out pre-built stub servers by name.
#[derive(Clone, Default)]
pub struct StubLauncher {
    servers: HashMap<String, StubServer>,
    launch_delays: HashMap<String, Duration>,
}

impl StubLauncher {
    pub fn new(servers: Vec<StubServer>) -> Self {
        Self {
            servers: servers.into_iter().map(|s| (s.name.clone(), s)).collect(),
            launch_delays: HashMap::new(),
        }
    }

    /// Make launching `server` take `delay`, like a slow handshake.
    pub fn with_launch_delay(mut self, server: &str, delay: Duration) -> Self {
        self.launch_delays.insert(server.to_string(), delay);
        self
    }
}

#[async_trait]
impl ServerLauncher for StubLauncher {
    async fn launch(&self, spec: &ServerSpec) -> Result<Arc<dyn CapabilityServer>, McpError> {
        if let Some(delay) = self.launch_delays.get(&spec.name) {
            tokio::time::sleep(*delay).await;
        }
        match self.servers.get(&spec.name) {
            Some(server) => Ok(Arc::new(server.clone())),
            None => Err(McpError::SpawnFailed {
                name: spec.name.clone(),
                reason: "no stub registered for this server".into(),
            }),
        }
    }
}
