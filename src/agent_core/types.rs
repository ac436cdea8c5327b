//! Shared types across the agent core.

use std::time::Duration;

use serde::Deserialize;

/// The `agent` configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// Ceiling on reasoning-service calls per session.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Per capability call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Tool results longer than this are truncated before the model sees them.
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
    /// Whole consultation, including startup and enrichment.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Run the drug enrichment pass after the loop.
    #[serde(default = "default_enrich")]
    pub enrich: bool,
    /// Replaces the built-in system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_max_turns() -> usize {
    8
}
fn default_call_timeout_ms() -> u64 {
    30_000
}
fn default_max_tool_result_chars() -> usize {
    6_000
}
fn default_session_timeout_secs() -> u64 {
    300
}
fn default_enrich() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            call_timeout_ms: default_call_timeout_ms(),
            max_tool_result_chars: default_max_tool_result_chars(),
            session_timeout_secs: default_session_timeout_secs(),
            enrich: default_enrich(),
            system_prompt: None,
        }
    }
}

impl AgentSettings {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}
