//! Routing table: operation name → owning server.
//!
//! Provides:
//! - Collision-checked registration of each server's enumerated operations
//! - Lookup of the owning server for an operation
//! - Structural validation of call arguments against the advertised schema
//! - Serialization of the catalog into OpenAI function-calling format
//! - "Did you mean" suggestions for routing misses

use std::collections::HashMap;

use super::errors::McpError;
use super::types::OperationDescriptor;

/// Similarity floor below which an operation is not suggested.
const SUGGESTION_FLOOR: f64 = 0.4;

// ─── RoutingTable ────────────────────────────────────────────────────────────

/// Operation routing across every server attached to one manager.
///
/// Operation names are plain (`search_bnf_drugs`, not `bnf.search`) and must
/// be unique across servers.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    /// `operation name → descriptor` (descriptor.server is the owner).
    operations: HashMap<String, OperationDescriptor>,
    /// Servers in registration order.
    servers: Vec<String>,
}

impl RoutingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from per-server listings, in order.
    pub fn build(
        listings: impl IntoIterator<Item = (String, Vec<OperationDescriptor>)>,
    ) -> Result<Self, McpError> {
        let mut table = Self::new();
        for (server, ops) in listings {
            table.register_server(&server, ops)?;
        }
        Ok(table)
    }

    /// Register one server's operations.
    ///
    /// All-or-nothing: a name already owned by another server rejects the
    /// whole listing and leaves the table unchanged.
    pub fn register_server(
        &mut self,
        server: &str,
        ops: Vec<OperationDescriptor>,
    ) -> Result<(), McpError> {
        for op in &ops {
            if let Some(existing) = self.operations.get(&op.name) {
                if existing.server != server {
                    return Err(McpError::DuplicateOperation {
                        operation: op.name.clone(),
                        first: existing.server.clone(),
                        second: server.to_string(),
                    });
                }
            }
        }

        for mut op in ops {
            if self.operations.contains_key(&op.name) {
                tracing::warn!(server, operation = %op.name, "server listed operation twice");
                continue;
            }
            op.server = server.to_string();
            self.operations.insert(op.name.clone(), op);
        }

        if !self.servers.iter().any(|s| s == server) {
            self.servers.push(server.to_string());
        }
        Ok(())
    }

    /// Remove a server and every operation it owns.
    pub fn unregister_server(&mut self, server: &str) {
        self.operations.retain(|_, op| op.server != server);
        self.servers.retain(|s| s != server);
    }

    /// Look up an operation descriptor.
    pub fn get_operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.get(name)
    }

    /// Get the server name that owns an operation.
    pub fn get_server_for(&self, operation: &str) -> Option<&str> {
        self.operations.get(operation).map(|op| op.server.as_str())
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.operations.contains_key(operation)
    }

    /// All operations, sorted by name.
    pub fn all_operations(&self) -> Vec<&OperationDescriptor> {
        let mut ops: Vec<&OperationDescriptor> = self.operations.values().collect();
        ops.sort_by(|a, b| a.name.cmp(&b.name));
        ops
    }

    /// Operations owned by one server, sorted by name.
    pub fn operations_for_server(&self, server: &str) -> Vec<&OperationDescriptor> {
        let mut ops: Vec<&OperationDescriptor> = self
            .operations
            .values()
            .filter(|op| op.server == server)
            .collect();
        ops.sort_by(|a, b| a.name.cmp(&b.name));
        ops
    }

    /// Sorted operation names.
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Servers with a registered listing, in registration order.
    pub fn server_names(&self) -> &[String] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Validate that a call matches the registered operation.
    ///
    /// This is a basic structural check: the operation exists, arguments are
    /// an object when the schema says so, and required fields are present.
    /// Full JSON Schema validation is left to the server.
    pub fn validate_call(
        &self,
        operation: &str,
        arguments: &serde_json::Value,
    ) -> Result<(), McpError> {
        let def = self
            .get_operation(operation)
            .ok_or_else(|| self.unknown_operation(operation))?;

        let schema = &def.input_schema;
        let expects_object = schema.get("type").and_then(|t| t.as_str()) == Some("object");
        if expects_object && !arguments.is_object() {
            return Err(McpError::InvalidArguments {
                operation: operation.to_string(),
                reason: "arguments must be an object".into(),
            });
        }

        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            let args_obj = arguments.as_object();
            for field_name in required.iter().filter_map(|f| f.as_str()) {
                let has_field = args_obj
                    .map(|obj| obj.contains_key(field_name))
                    .unwrap_or(false);
                if !has_field {
                    return Err(McpError::InvalidArguments {
                        operation: operation.to_string(),
                        reason: format!("missing required field: '{field_name}'"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Build the routing-miss error with up to three suggestions.
    pub fn unknown_operation(&self, name: &str) -> McpError {
        McpError::UnknownOperation {
            name: name.to_string(),
            suggestions: self.find_similar(name, 3),
        }
    }

    /// Serialize the catalog into OpenAI function-calling format, sorted by name.
    pub fn to_openai_tools(&self) -> Vec<serde_json::Value> {
        self.all_operations()
            .into_iter()
            .map(|op| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": op.name,
                        "description": op.description,
                        "parameters": op.input_schema,
                    }
                })
            })
            .collect()
    }

    /// Find up to `max_results` operation names most similar to `name`.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let query = name.to_lowercase();
        let mut scored: Vec<(&str, f64)> = self
            .operations
            .keys()
            .map(|candidate| (candidate.as_str(), similarity(&query, candidate)))
            .filter(|(_, score)| *score >= SUGGESTION_FLOOR)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        scored.truncate(max_results);
        scored.into_iter().map(|(n, _)| n.to_string()).collect()
    }
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Levenshtein edit distance over chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Normalized similarity (0.0 = completely different, 1.0 = identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
