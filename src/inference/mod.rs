//! Reasoning service: the model that decides which operations to call and
//! writes the final answer.
//!
//! The agent loop talks to the [`ReasoningService`] trait. The shipped
//! implementation speaks the OpenAI Chat Completions API, so the model is
//! interchangeable via config.

pub mod client;
pub mod config;
pub mod errors;
pub mod service;
pub mod tool_call_parser;
pub mod types;

pub use client::InferenceClient;
pub use config::ReasoningConfig;
pub use errors::InferenceError;
pub use service::{ReasoningService, ScriptedReasoner};
pub use types::{ChatMessage, ReasoningReply, ReasoningRequest, Role, ToolCall, ToolResult, Turn};
