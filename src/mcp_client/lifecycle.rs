//! Server process lifecycle management.
//!
//! Handles spawning and shutting down capability server child processes.
//! Each server runs as a separate OS process communicating via JSON-RPC over
//! stdio. Children are spawned with `kill_on_drop`, so dropping a server
//! (for example when a timed-out request future is cancelled) still reaps
//! the process even if `close()` never ran.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::server::{CapabilityServer, ServerLauncher};
use super::transport::{extract_result, StdioTransport};
use super::types::{
    CallOutcome, InitializeResult, ListToolsResult, OperationDescriptor, ServerSpec, ServerState,
    PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// Cap on captured stderr attached to startup errors.
const MAX_STDERR_CHARS: usize = 2000;

// ─── StdioServer ─────────────────────────────────────────────────────────────

/// A running capability server process with its transport.
pub struct StdioServer {
    name: String,
    /// `None` once the process has been shut down.
    process: Mutex<Option<Child>>,
    transport: StdioTransport,
    state: StdMutex<ServerState>,
}

impl StdioServer {
    fn set_state(&self, state: ServerState) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = state;
    }
}

#[async_trait]
impl CapabilityServer for StdioServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ServerState {
        let state = *self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state == ServerState::Ready && self.transport.is_closed() {
            ServerState::Closed
        } else {
            state
        }
    }

    async fn list_operations(&self) -> Result<Vec<OperationDescriptor>, McpError> {
        let response = self.transport.request("tools/list", None).await?;
        let result = extract_result(response)?;
        let listed: ListToolsResult =
            serde_json::from_value(result).map_err(|e| McpError::TransportError {
                server: self.name.clone(),
                reason: format!("failed to parse tools/list response: {e}"),
            })?;
        Ok(listed.tools)
    }

    async fn invoke(
        &self,
        operation: &str,
        arguments: serde_json::Value,
    ) -> Result<CallOutcome, McpError> {
        let params = serde_json::json!({
            "name": operation,
            "arguments": arguments,
        });
        let response = self.transport.request("tools/call", Some(params)).await?;

        match extract_result(response) {
            Ok(result) => Ok(CallOutcome::from_mcp_result(result)),
            Err(McpError::ServerError { code, message, .. }) => {
                Ok(CallOutcome::Error(format!("[{code}] {message}")))
            }
            Err(e) => Err(e),
        }
    }

    async fn read_resource(&self, uri: &str) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({ "uri": uri });
        let response = self.transport.request("resources/read", Some(params)).await?;
        extract_result(response)
    }

    async fn close(&self) -> Result<(), McpError> {
        let mut guard = self.process.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };

        // Best-effort notification; a wedged channel must not stall cleanup.
        let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, self.transport.notify("shutdown", None))
            .await;
        self.transport.mark_closed();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "server exited");
            }
            _ => {
                tracing::debug!(server = %self.name, "server did not exit, killing");
                let _ = child.kill().await;
            }
        }

        self.set_state(ServerState::Closed);
        Ok(())
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a single capability server process and perform the handshake.
pub async fn spawn_server(
    spec: &ServerSpec,
    working_dir: Option<&str>,
) -> Result<StdioServer, McpError> {
    let name = spec.name.as_str();
    let launch = &spec.launch;

    if launch.command.trim().is_empty() {
        return Err(McpError::ConfigError {
            reason: format!("server '{name}' has an empty command"),
        });
    }

    let mut cmd = Command::new(&launch.command);
    cmd.args(&launch.args);
    for (key, value) in &launch.env {
        cmd.env(key, value);
    }

    // Per-server cwd overrides the launcher's working_dir
    if let Some(dir) = launch.cwd.as_deref().or(working_dir) {
        cmd.current_dir(dir);
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;
    let stderr_handle = child.stderr.take();

    let transport = StdioTransport::new(name, stdin, stdout);

    tracing::debug!(server = name, command = %launch.command, "server process spawned");

    let failure = match tokio::time::timeout(INIT_TIMEOUT, initialize(&transport, name)).await {
        Ok(Ok(init)) => {
            let server_name = init
                .server_info
                .as_ref()
                .and_then(|info| info.name.clone())
                .unwrap_or_default();
            tracing::info!(server = name, reported_name = %server_name, "server ready");

            if let Some(stderr) = stderr_handle {
                tokio::spawn(forward_stderr(name.to_string(), stderr));
            }

            return Ok(StdioServer {
                name: name.to_string(),
                process: Mutex::new(Some(child)),
                transport,
                state: StdMutex::new(ServerState::Ready),
            });
        }
        Ok(Err(e)) => format!("{e}"),
        Err(_) => format!("initialization timed out after {}s", INIT_TIMEOUT.as_secs()),
    };

    let _ = child.kill().await;
    let stderr_ctx = read_stderr_on_failure(stderr_handle).await;
    if !stderr_ctx.is_empty() {
        tracing::warn!(server = name, stderr = %stderr_ctx, "server stderr captured on failure");
    }

    Err(McpError::InitFailed {
        name: name.to_string(),
        reason: format!("{failure}{}", format_stderr_suffix(&stderr_ctx)),
    })
}

/// Perform the MCP initialization handshake.
async fn initialize(
    transport: &StdioTransport,
    server_name: &str,
) -> Result<InitializeResult, McpError> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    let response = transport.request("initialize", Some(params)).await?;
    let result = extract_result(response)?;

    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: server_name.to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    transport.notify("notifications/initialized", None).await?;
    Ok(init)
}

/// Drain a ready server's stderr into debug logs so the pipe never fills.
async fn forward_stderr(server: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %server, "{line}");
    }
}

/// Read any available stderr output from a failed server process.
async fn read_stderr_on_failure(stderr_handle: Option<ChildStderr>) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(Duration::from_millis(500), stderr.read_to_string(&mut buf)).await
    {
        Ok(Ok(_)) => truncate_chars(buf, MAX_STDERR_CHARS),
        _ => String::new(),
    }
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...(truncated)", &s[..idx]),
        None => s,
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Launchers ───────────────────────────────────────────────────────────────

/// Launches servers as stdio child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    working_dir: Option<String>,
}

impl ProcessLauncher {
    pub fn new(working_dir: Option<String>) -> Self {
        Self { working_dir }
    }
}

#[async_trait]
impl ServerLauncher for ProcessLauncher {
    async fn launch(&self, spec: &ServerSpec) -> Result<Arc<dyn CapabilityServer>, McpError> {
        let server = spawn_server(spec, self.working_dir.as_deref()).await?;
        Ok(Arc::new(server))
    }
}

// ─── Batch Operations ────────────────────────────────────────────────────────

/// Launch every spec concurrently.
///
/// All-or-nothing: the first failure ends the launch without waiting for
/// slower siblings. Launches that already finished are closed; launches
/// still in flight are dropped, and `kill_on_drop` reaps their processes.
/// On success the servers are returned in spec order.
pub async fn launch_all(
    launcher: &dyn ServerLauncher,
    specs: &[ServerSpec],
) -> Result<Vec<Arc<dyn CapabilityServer>>, McpError> {
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(McpError::ConfigError {
                reason: format!("server '{}' listed more than once", spec.name),
            });
        }
    }

    let mut pending: FuturesUnordered<_> = specs
        .iter()
        .enumerate()
        .map(|(index, spec)| async move {
            tracing::info!(server = %spec.name, "launching capability server");
            (index, launcher.launch(spec).await)
        })
        .collect();

    let mut started: Vec<(usize, Arc<dyn CapabilityServer>)> = Vec::with_capacity(specs.len());
    while let Some((index, result)) = pending.next().await {
        match result {
            Ok(server) => started.push((index, server)),
            Err(e) => {
                tracing::warn!(
                    server = %specs[index].name,
                    error = %e,
                    in_flight = pending.len(),
                    "capability server failed to start, aborting connect"
                );
                // Collect launches that finish without waiting, so they get closed too.
                loop {
                    match pending.next().now_or_never() {
                        Some(Some((index, Ok(server)))) => started.push((index, server)),
                        Some(Some((_, Err(_)))) => continue,
                        _ => break,
                    }
                }
                drop(pending);
                let servers: Vec<_> = started.into_iter().map(|(_, server)| server).collect();
                close_all(&servers).await;
                return Err(e);
            }
        }
    }

    started.sort_by_key(|(index, _)| *index);
    Ok(started.into_iter().map(|(_, server)| server).collect())
}

/// Close every server concurrently, logging (not returning) failures.
pub async fn close_all(servers: &[Arc<dyn CapabilityServer>]) {
    let results = join_all(servers.iter().map(|server| server.close())).await;
    for (server, result) in servers.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!(server = %server.name(), error = %e, "error closing server");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
