//! Capability connection manager: JSON-RPC over stdio to capability servers.
//!
//! This module handles:
//! - Spawning capability server child processes and the MCP handshake
//! - JSON-RPC 2.0 communication over process stdio
//! - Operation discovery and the operation → server routing table
//! - Call routing, argument validation, and per-call timeouts
//! - Idempotent cleanup of every attached server
//!
//! Servers attach through the [`CapabilityServer`] trait, so in-process
//! stubs and subprocesses are interchangeable.

pub mod client;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod server;
pub mod stub;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use errors::McpError;
pub use lifecycle::ProcessLauncher;
pub use registry::RoutingTable;
pub use server::{CapabilityServer, ServerLauncher};
pub use stub::{StubLauncher, StubServer};
pub use types::{CallOutcome, LaunchSpec, OperationDescriptor, ServerSpec, ServerState};
