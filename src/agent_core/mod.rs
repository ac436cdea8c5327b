//! Agent Core: orchestration layer for Medroute.
//!
//! Submodules:
//! - `conversation`: Explicit reasoning-session state machine and turn ceiling
//! - `tool_router`: Dispatches requested operations through the cache to servers
//! - `orchestrator`: The agentic reasoning loop
//! - `answer`: Structured answer types and lenient final-text parsing
//! - `enrichment`: Concurrent drug-reference lookups on a finished answer
//! - `pipeline`: End-to-end consultation (region → connect → loop → enrich → cleanup)
//! - `types`: Agent settings
//! - `errors`: Agent-level error types

pub mod answer;
pub mod conversation;
pub mod enrichment;
pub mod errors;
pub mod orchestrator;
pub mod pipeline;
pub mod tool_router;
pub mod types;

// Re-exports for convenience
pub use answer::{
    parse_structured_answer, Confidence, Diagnosis, DrugEnrichment, ParseMode, StructuredAnswer,
    Treatment,
};
pub use conversation::{LoopState, NextStep, ReasoningSession};
pub use enrichment::{enrich_answer, EnrichmentMap};
pub use errors::AgentError;
pub use orchestrator::{AgentLoop, LoopOutcome, DEFAULT_SYSTEM_PROMPT};
pub use pipeline::{Consultation, ConsultationReport};
pub use tool_router::{truncate_tool_result, ToolRouter};
pub use types::AgentSettings;
