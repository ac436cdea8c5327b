//! ToolRouter: dispatches requested operations to capability servers.
//!
//! Each call goes through the result cache when the policy marks the
//! operation cacheable, is retried on transient transport errors, and is
//! rendered into a [`ToolResult`] the reasoning service can read. Routing
//! misses and call failures become error results, never errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::cache::{CachePolicy, KeyClass, ResultCache};
use crate::inference::{ToolCall, ToolResult};
use crate::mcp_client::types::OperationResult;
use crate::mcp_client::{CallOutcome, McpClient, McpError};

/// Maximum retry attempts for transient call errors.
const MAX_RETRIES: u32 = 2;

/// Base delay between retries (doubles each attempt).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

pub struct ToolRouter {
    cache: Arc<ResultCache>,
    policy: Arc<CachePolicy>,
    max_result_chars: usize,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl ToolRouter {
    pub fn new(cache: Arc<ResultCache>, policy: Arc<CachePolicy>, max_result_chars: usize) -> Self {
        Self {
            cache,
            policy,
            max_result_chars,
            max_retries: MAX_RETRIES,
            retry_base_delay: RETRY_BASE_DELAY,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Dispatch all calls of one turn concurrently. Results keep call order.
    pub async fn dispatch_turn(&self, client: &McpClient, calls: &[ToolCall]) -> Vec<ToolResult> {
        let results = join_all(
            calls
                .iter()
                .map(|call| self.call(client, &call.name, call.arguments.clone())),
        )
        .await;

        calls
            .iter()
            .zip(results)
            .map(|(call, result)| self.render(call, &result))
            .collect()
    }

    /// One operation call: cache lookup, routed call with retry, cache fill.
    pub async fn call(
        &self,
        client: &McpClient,
        operation: &str,
        arguments: serde_json::Value,
    ) -> OperationResult {
        let start = Instant::now();
        let cache_key = self.policy.key_for(operation, &arguments);

        if let Some((class, raw)) = &cache_key {
            if let Some(content) = self.cached(*class, raw).await {
                tracing::debug!(operation, class = %class, "cache hit");
                return OperationResult {
                    operation: operation.to_string(),
                    success: true,
                    content: Some(content),
                    error: None,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                    cached: true,
                };
            }
        }

        let outcome = self.call_with_retry(client, operation, arguments).await;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(CallOutcome::Content(content)) => {
                if let Some((class, raw)) = &cache_key {
                    self.store(*class, raw, &content).await;
                }
                OperationResult {
                    operation: operation.to_string(),
                    success: true,
                    content: Some(content),
                    error: None,
                    execution_time_ms,
                    cached: false,
                }
            }
            Ok(CallOutcome::Error(message)) => failed(operation, message, execution_time_ms),
            Err(e) => failed(operation, error_text(&e), execution_time_ms),
        };

        tracing::info!(
            operation,
            success = result.success,
            execution_time_ms,
            "operation dispatched"
        );
        result
    }

    /// Cache access runs on the blocking pool; the store is synchronous SQLite.
    async fn cached(&self, class: KeyClass, raw: &str) -> Option<serde_json::Value> {
        let cache = Arc::clone(&self.cache);
        let raw = raw.to_string();
        tokio::task::spawn_blocking(move || cache.get(class, &raw))
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "cache read task failed, treating as miss");
                None
            })
    }

    async fn store(&self, class: KeyClass, raw: &str, content: &serde_json::Value) {
        let cache = Arc::clone(&self.cache);
        let raw = raw.to_string();
        let content = content.clone();
        let write = tokio::task::spawn_blocking(move || cache.set(class, &raw, &content, None));
        if let Err(e) = write.await {
            tracing::debug!(error = %e, "cache write task failed");
        }
    }

    async fn call_with_retry(
        &self,
        client: &McpClient,
        operation: &str,
        arguments: serde_json::Value,
    ) -> Result<CallOutcome, McpError> {
        let mut attempt = 0;
        loop {
            match client.call(operation, arguments.clone(), None).await {
                Err(e) if is_retriable(&e) && attempt < self.max_retries => {
                    let delay = self.retry_base_delay * 2u32.pow(attempt);
                    tracing::warn!(operation, error = %e, attempt = attempt + 1, "retrying operation");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn render(&self, call: &ToolCall, result: &OperationResult) -> ToolResult {
        let text = match (&result.content, &result.error) {
            (Some(serde_json::Value::String(s)), _) => s.clone(),
            (Some(value), _) => value.to_string(),
            (None, Some(error)) => format!("Error: {error}"),
            (None, None) => String::new(),
        };

        ToolResult {
            call_id: call.id.clone(),
            operation: call.name.clone(),
            content: truncate_tool_result(&text, &call.name, self.max_result_chars),
            is_error: !result.success,
        }
    }
}

fn failed(operation: &str, error: String, execution_time_ms: u64) -> OperationResult {
    OperationResult {
        operation: operation.to_string(),
        success: false,
        content: None,
        error: Some(error),
        execution_time_ms,
        cached: false,
    }
}

/// Error text for the reasoning service. Routing misses carry suggestions.
fn error_text(err: &McpError) -> String {
    match err {
        McpError::UnknownOperation { suggestions, .. } if !suggestions.is_empty() => {
            format!("{err}. Did you mean: {}?", suggestions.join(", "))
        }
        _ => err.to_string(),
    }
}

/// Transient errors worth another attempt. A closed channel is not.
fn is_retriable(err: &McpError) -> bool {
    matches!(err, McpError::Timeout { .. } | McpError::TransportError { .. })
}

/// Cap a result at `max_chars` characters with a truncation notice.
pub fn truncate_tool_result(result: &str, operation: &str, max_chars: usize) -> String {
    let total = result.chars().count();
    if total <= max_chars {
        return result.to_string();
    }

    let cut = result
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(result.len());
    tracing::warn!(
        operation,
        original_len = total,
        truncated_to = max_chars,
        "tool result truncated"
    );
    format!(
        "{}\n\n[... truncated: showing first {max_chars} of {total} chars]",
        &result[..cut]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        CacheError, CacheRecord, CacheRule, CacheStats, CacheStore, SqliteCacheStore,
    };
    use crate::mcp_client::{CapabilityServer, ServerSpec, StubLauncher, StubServer};

    async fn connected(servers: Vec<StubServer>) -> McpClient {
        let specs: Vec<ServerSpec> = servers
            .iter()
            .map(|s| ServerSpec::new(s.name(), Default::default()))
            .collect();
        let launcher = StubLauncher::new(servers);
        let mut client = McpClient::new().with_call_timeout(1_000);
        client.connect(&launcher, &specs).await.unwrap();
        client
    }

    fn router(policy: CachePolicy) -> ToolRouter {
        let store = SqliteCacheStore::open(":memory:").unwrap();
        let cache = Arc::new(ResultCache::new(Arc::new(store)));
        ToolRouter::new(cache, Arc::new(policy), 500).with_retries(0, Duration::ZERO)
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn test_truncate_tool_result() {
        assert_eq!(truncate_tool_result("short", "op", 10), "short");
        let long = "é".repeat(20);
        let out = truncate_tool_result(&long, "op", 5);
        assert!(out.starts_with("ééééé\n"));
        assert!(out.contains("showing first 5 of 20 chars"));
    }

    #[tokio::test]
    async fn test_dispatch_turn_keeps_order_and_marks_errors() {
        let server = StubServer::new("guides", &["search_nice_guidelines", "get_nice_guideline"])
            .with_reply("search_nice_guidelines", serde_json::json!("three results"))
            .with_error("get_nice_guideline", "not found");
        let client = connected(vec![server]).await;
        let router = router(CachePolicy::none());

        let results = router
            .dispatch_turn(
                &client,
                &[
                    call("c1", "search_nice_guidelines", serde_json::json!({"query": "copd"})),
                    call("c2", "get_nice_guideline", serde_json::json!({"guideline_id": "NG115"})),
                    call("c3", "search_nice_guidlines", serde_json::json!({})),
                ],
            )
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].call_id, "c1");
        assert_eq!(results[0].content, "three results");
        assert!(!results[0].is_error);
        assert!(results[1].is_error);
        assert!(results[1].content.contains("not found"));
        // Routing miss comes back as an error result with a suggestion.
        assert!(results[2].is_error);
        assert!(results[2].content.contains("search_nice_guidelines"));
    }

    #[tokio::test]
    async fn test_cacheable_call_hits_server_once() {
        let server = StubServer::new("drugs", &["search_bnf_drugs"])
            .with_reply("search_bnf_drugs", serde_json::json!([{"drug_id": "amx"}]));
        let handle = server.clone();
        let client = connected(vec![server]).await;
        let router = router(CachePolicy::builtin());

        let args = serde_json::json!({"name": "Amoxicillin"});
        let first = router.call(&client, "search_bnf_drugs", args.clone()).await;
        let second = router.call(&client, "search_bnf_drugs", args).await;

        assert!(first.success && !first.cached);
        assert!(second.success && second.cached);
        assert_eq!(first.content, second.content);
        assert_eq!(handle.call_count(), 1);
    }

    #[tokio::test]
    async fn test_filters_outside_key_field_get_their_own_entry() {
        let server = StubServer::new("guides", &["search_nice_guidelines"]).with_handler(
            "search_nice_guidelines",
            |args| Ok(CallOutcome::Content(serde_json::json!({"max": args["max_results"]}))),
        );
        let handle = server.clone();
        let client = connected(vec![server]).await;
        let router = router(CachePolicy::builtin());

        let few = router
            .call(
                &client,
                "search_nice_guidelines",
                serde_json::json!({"query": "asthma", "max_results": 3}),
            )
            .await;
        let many = router
            .call(
                &client,
                "search_nice_guidelines",
                serde_json::json!({"query": "asthma", "max_results": 20}),
            )
            .await;

        assert_eq!(few.content, Some(serde_json::json!({"max": 3})));
        assert_eq!(many.content, Some(serde_json::json!({"max": 20})));
        assert!(!many.cached);
        assert_eq!(handle.call_count(), 2);
    }

    /// A store whose reads block the calling thread.
    struct SlowStore(Duration);

    impl CacheStore for SlowStore {
        fn get(&self, _key: &str) -> Result<Option<CacheRecord>, CacheError> {
            std::thread::sleep(self.0);
            Ok(None)
        }
        fn upsert(&self, _record: &CacheRecord) -> Result<(), CacheError> {
            Ok(())
        }
        fn record_hit(&self, _key: &str, _now_ms: i64) -> Result<bool, CacheError> {
            Ok(false)
        }
        fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Ok(false)
        }
        fn delete_if_expired(&self, _key: &str, _now_ms: i64) -> Result<bool, CacheError> {
            Ok(false)
        }
        fn delete_expired(&self, _now_ms: i64) -> Result<usize, CacheError> {
            Ok(0)
        }
        fn stats(&self) -> Result<CacheStats, CacheError> {
            Ok(CacheStats::default())
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_slow_cache_store_does_not_stall_the_runtime() {
        let client = connected(vec![StubServer::new("drugs", &["search_bnf_drugs"])]).await;
        let cache = Arc::new(ResultCache::new(Arc::new(SlowStore(Duration::from_millis(400)))));
        let router = ToolRouter::new(cache, Arc::new(CachePolicy::builtin()), 500)
            .with_retries(0, Duration::ZERO);

        let started = Instant::now();
        let (result, ticked_at) = tokio::join!(
            router.call(&client, "search_bnf_drugs", serde_json::json!({"name": "ibuprofen"})),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                started.elapsed()
            }
        );

        assert!(result.success);
        // On the single runtime thread, the timer only fires on time if the
        // store read was moved off it.
        assert!(ticked_at < Duration::from_millis(300), "timer fired at {ticked_at:?}");
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let server = StubServer::new("drugs", &["get_bnf_drug"]).with_error("get_bnf_drug", "boom");
        let handle = server.clone();
        let client = connected(vec![server]).await;
        let mut policy = CachePolicy::none();
        policy.insert(
            "get_bnf_drug",
            CacheRule::new(KeyClass::DrugDetail, Some("drug_id")),
        );
        let router = router(policy);

        let args = serde_json::json!({"drug_id": "x"});
        assert!(!router.call(&client, "get_bnf_drug", args.clone()).await.success);
        assert!(!router.call(&client, "get_bnf_drug", args).await.success);
        assert_eq!(handle.call_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let server = StubServer::new("slow", &["search_who_guidelines"])
            .with_delay(Duration::from_millis(100))
            .with_reply("search_who_guidelines", serde_json::json!("late"));
        let handle = server.clone();
        let specs = vec![ServerSpec::new("slow", Default::default())];
        let mut client = McpClient::new().with_call_timeout(10);
        client
            .connect(&StubLauncher::new(vec![server]), &specs)
            .await
            .unwrap();
        let router = router(CachePolicy::none()).with_retries(2, Duration::from_millis(1));

        let result = router
            .call(&client, "search_who_guidelines", serde_json::json!({}))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
        assert_eq!(handle.call_count(), 3);
    }
}
