//! McpClient: the capability connection manager.
//!
//! Owns the attached servers for one session, builds the routing table from
//! their enumerated operations, and routes calls. One instance per request;
//! never shared across concurrent sessions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use super::errors::McpError;
use super::lifecycle::{close_all, launch_all};
use super::registry::RoutingTable;
use super::server::{CapabilityServer, ServerLauncher};
use super::types::{CallOutcome, OperationDescriptor, ServerSpec, ServerState};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default timeout for one operation call (ms).
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

// ─── McpClient ───────────────────────────────────────────────────────────────

pub struct McpClient {
    /// Attached servers, in connect order.
    servers: Vec<Arc<dyn CapabilityServer>>,
    routing: RoutingTable,
    call_timeout_ms: u64,
}

impl McpClient {
    pub fn new() -> Self {
        Self {
            servers: Vec::new(),
            routing: RoutingTable::new(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }

    /// Set the per-call timeout in milliseconds.
    pub fn with_call_timeout(mut self, timeout_ms: u64) -> Self {
        self.call_timeout_ms = timeout_ms;
        self
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Launch every server concurrently and build the routing table.
    ///
    /// Fails as a whole if any server fails to start or two servers expose
    /// the same operation; in both cases everything that did start is closed
    /// first. A server whose enumeration fails stays attached with no routed
    /// operations.
    ///
    /// Connecting again replaces the previous server set.
    pub async fn connect(
        &mut self,
        launcher: &dyn ServerLauncher,
        specs: &[ServerSpec],
    ) -> Result<(), McpError> {
        self.cleanup().await;

        let started = Instant::now();
        let servers = launch_all(launcher, specs).await?;

        let listings = join_all(servers.iter().map(|s| s.list_operations())).await;
        let mut enumerated = Vec::with_capacity(servers.len());
        for (server, listing) in servers.iter().zip(listings) {
            match listing {
                Ok(ops) => {
                    tracing::debug!(server = %server.name(), operations = ops.len(), "operations enumerated");
                    enumerated.push((server.name().to_string(), ops));
                }
                Err(e) => {
                    tracing::warn!(
                        server = %server.name(),
                        error = %e,
                        "operation enumeration failed, server's operations omitted"
                    );
                }
            }
        }

        let routing = match RoutingTable::build(enumerated) {
            Ok(table) => table,
            Err(e) => {
                tracing::error!(error = %e, "routing table build failed");
                close_all(&servers).await;
                return Err(e);
            }
        };

        tracing::info!(
            servers = servers.len(),
            operations = routing.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "capability servers connected"
        );

        self.servers = servers;
        self.routing = routing;
        Ok(())
    }

    /// Close every server and clear the routing table. Idempotent.
    pub async fn cleanup(&mut self) {
        if self.servers.is_empty() && self.routing.is_empty() {
            return;
        }
        let servers = std::mem::take(&mut self.servers);
        self.routing = RoutingTable::new();
        close_all(&servers).await;
        tracing::info!(servers = servers.len(), "capability servers released");
    }

    // ─── Routing ─────────────────────────────────────────────────────────

    /// Route one operation call.
    ///
    /// With `server` given the call goes straight to that server; otherwise
    /// the routing table picks the owner and the arguments are checked
    /// against its schema first.
    pub async fn call(
        &self,
        operation: &str,
        arguments: serde_json::Value,
        server: Option<&str>,
    ) -> Result<CallOutcome, McpError> {
        let target = match server {
            Some(name) => self.find_server(name)?,
            None => {
                self.routing.validate_call(operation, &arguments)?;
                let owner = self
                    .routing
                    .get_server_for(operation)
                    .ok_or_else(|| self.routing.unknown_operation(operation))?;
                self.find_server(owner)?
            }
        };

        if target.state() != ServerState::Ready {
            return Err(McpError::Unreachable {
                name: target.name().to_string(),
                reason: format!("server is {:?}", target.state()).to_lowercase(),
            });
        }

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(self.call_timeout_ms),
            target.invoke(operation, arguments),
        )
        .await
        .map_err(|_| McpError::Timeout {
            operation: operation.to_string(),
            timeout_ms: self.call_timeout_ms,
        })??;

        tracing::debug!(
            server = %target.name(),
            operation,
            is_error = outcome.is_error(),
            execution_time_ms = start.elapsed().as_millis() as u64,
            "operation call complete"
        );
        Ok(outcome)
    }

    /// Enumerated operations, for one server or all of them.
    pub fn list_operations(&self, server: Option<&str>) -> Result<Vec<OperationDescriptor>, McpError> {
        let ops = match server {
            Some(name) => {
                self.find_server(name)?;
                self.routing.operations_for_server(name)
            }
            None => self.routing.all_operations(),
        };
        Ok(ops.into_iter().cloned().collect())
    }

    /// Read a resource from `server`, or from the first server that has it.
    pub async fn read_resource(
        &self,
        uri: &str,
        server: Option<&str>,
    ) -> Result<serde_json::Value, McpError> {
        if let Some(name) = server {
            return self.find_server(name)?.read_resource(uri).await;
        }

        let mut last_error = None;
        for candidate in self.servers.iter().filter(|s| s.state() == ServerState::Ready) {
            match candidate.read_resource(uri).await {
                Ok(value) => return Ok(value),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| McpError::Unreachable {
            name: uri.to_string(),
            reason: "no ready server to read from".into(),
        }))
    }

    fn find_server(&self, name: &str) -> Result<&Arc<dyn CapabilityServer>, McpError> {
        self.servers
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })
    }

    // ─── Status ──────────────────────────────────────────────────────────

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// The operation catalog in OpenAI function-calling format.
    pub fn catalog(&self) -> Vec<serde_json::Value> {
        self.routing.to_openai_tools()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn operation_count(&self) -> usize {
        self.routing.len()
    }

    /// `(name, state)` for every attached server, in connect order.
    pub fn server_states(&self) -> Vec<(String, ServerState)> {
        self.servers
            .iter()
            .map(|s| (s.name().to_string(), s.state()))
            .collect()
    }
}

impl Default for McpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if !self.servers.is_empty() {
            // Stdio children are spawned kill_on_drop and die with their handles.
            tracing::debug!(
                servers = self.servers.len(),
                "client dropped without cleanup, releasing servers on drop"
            );
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
