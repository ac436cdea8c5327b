//! The reasoning-service seam.
//!
//! The agent loop only depends on [`ReasoningService`]; the HTTP client is one
//! implementation and [`ScriptedReasoner`] is a deterministic one for tests
//! and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::errors::InferenceError;
use super::types::{ReasoningReply, ReasoningRequest, ToolCall, Turn};

/// Produces the next reply given the scenario, the turn log and the operation
/// catalog.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn reason(&self, request: ReasoningRequest<'_>) -> Result<ReasoningReply, InferenceError>;
}

/// Replays a fixed list of replies, then repeats the last one.
///
/// Records the turn log it was shown on every call.
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<ReasoningReply, String>>>,
    last: Mutex<Option<ReasoningReply>>,
    seen: Mutex<Vec<Vec<Turn>>>,
    calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new(replies: Vec<ReasoningReply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().map(Ok).collect()),
            last: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Append a reply that fails with a connection error.
    pub fn then_fail(self, reason: &str) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(reason.to_string()));
        }
        self
    }

    /// A reasoner that requests the same single operation forever.
    pub fn looping(operation: &str, arguments: serde_json::Value) -> Self {
        Self::new(vec![ReasoningReply::Operations {
            text: None,
            calls: vec![ToolCall {
                id: "call_loop".into(),
                name: operation.to_string(),
                arguments,
            }],
        }])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Turn logs seen so far, one entry per call.
    pub fn seen_turns(&self) -> Vec<Vec<Turn>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn reason(&self, request: ReasoningRequest<'_>) -> Result<ReasoningReply, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request.turns.to_vec());
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let mut last = self.last.lock().map_err(|_| InferenceError::ConfigError {
            reason: "scripted reasoner lock poisoned".into(),
        })?;

        match next {
            Some(Ok(reply)) => {
                *last = Some(reply.clone());
                Ok(reply)
            }
            Some(Err(reason)) => Err(InferenceError::ConnectionFailed {
                endpoint: "scripted".into(),
                reason,
            }),
            None => last.clone().ok_or_else(|| InferenceError::ResponseParseError {
                reason: "script is empty".into(),
            }),
        }
    }
}
