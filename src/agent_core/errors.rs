//! Agent Core error types.
//!
//! Only session-level failures live here. Routing misses, capability call
//! failures and enrichment failures are absorbed into tool results or `None`
//! enrichments and never reach the caller.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::mcp_client::McpError;

use super::conversation::LoopState;

/// Errors that end a consultation.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A required capability server could not be started.
    #[error("capability startup failed: {0}")]
    StartupFailure(#[source] McpError),

    /// The reasoning service failed after its own retries.
    #[error("reasoning service failed: {0}")]
    Inference(#[from] InferenceError),

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// The whole session exceeded its time budget.
    #[error("session timed out after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// A session event arrived in a state that does not accept it.
    #[error("invalid session transition: {event} while {state:?}")]
    InvalidTransition { state: LoopState, event: &'static str },
}

impl From<serde_yaml::Error> for AgentError {
    fn from(e: serde_yaml::Error) -> Self {
        AgentError::Config {
            reason: e.to_string(),
        }
    }
}

impl From<crate::region::RegionError> for AgentError {
    fn from(e: crate::region::RegionError) -> Self {
        AgentError::Config {
            reason: e.to_string(),
        }
    }
}
