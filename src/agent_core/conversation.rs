//! ReasoningSession: the explicit state machine behind one reasoning loop.
//!
//! ```text
//!   Drafting ──final reply──────────────▶ Done
//!      │  ▲
//!  ops │  │ results (turns left)
//!      ▼  │
//!   AwaitingToolResults ──results (ceiling reached)──▶ Aborted
//! ```
//!
//! The turn log alternates strictly: every reasoning turn that requests
//! operations is followed by exactly one results turn. Events that would
//! break the alternation are rejected.

use serde::Serialize;

use crate::inference::{ReasoningReply, ToolCall, ToolResult, Turn};

use super::errors::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Drafting,
    AwaitingToolResults,
    Done,
    Aborted,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Done | LoopState::Aborted)
    }
}

/// What the loop should do after recording a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// The session is finished with this final text.
    Finish(String),
    /// Invoke these operations and record their results.
    Dispatch(Vec<ToolCall>),
    /// The ceiling was reached; the requested operations are not run.
    Abort,
}

/// Append-only turn log plus loop state for one consultation.
#[derive(Debug)]
pub struct ReasoningSession {
    scenario: String,
    turns: Vec<Turn>,
    state: LoopState,
    max_turns: usize,
    reasoning_turns: usize,
    final_text: Option<String>,
}

impl ReasoningSession {
    /// A ceiling of zero is raised to one.
    pub fn new(scenario: &str, max_turns: usize) -> Self {
        Self {
            scenario: scenario.to_string(),
            turns: Vec::new(),
            state: LoopState::Drafting,
            max_turns: max_turns.max(1),
            reasoning_turns: 0,
            final_text: None,
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Reasoning-service replies recorded so far.
    pub fn reasoning_turns(&self) -> usize {
        self.reasoning_turns
    }

    pub fn final_text(&self) -> Option<&str> {
        self.final_text.as_deref()
    }

    /// The most recent non-empty text the reasoning service produced, for a
    /// partial answer after an abort.
    pub fn last_text(&self) -> Option<&str> {
        self.final_text.as_deref().or_else(|| {
            self.turns.iter().rev().find_map(|turn| match turn {
                Turn::Reasoning { text: Some(t), .. } if !t.trim().is_empty() => Some(t.as_str()),
                _ => None,
            })
        })
    }

    /// Record a reasoning-service reply. Only valid while `Drafting`.
    ///
    /// An operations reply with no calls is treated as final. An operations
    /// reply on the last allowed turn aborts the session, since its results
    /// could never be shown to the reasoning service.
    pub fn record_reply(&mut self, reply: ReasoningReply) -> Result<NextStep, AgentError> {
        self.expect_state(LoopState::Drafting, "reasoning reply")?;
        self.reasoning_turns += 1;

        match reply {
            ReasoningReply::Final { text } => Ok(self.finish(text)),
            ReasoningReply::Operations { text, calls } if calls.is_empty() => {
                Ok(self.finish(text.unwrap_or_default()))
            }
            ReasoningReply::Operations { text, calls } if self.reasoning_turns >= self.max_turns => {
                self.turns.push(Turn::Reasoning { text, calls });
                self.state = LoopState::Aborted;
                Ok(NextStep::Abort)
            }
            ReasoningReply::Operations { text, calls } => {
                self.turns.push(Turn::Reasoning {
                    text,
                    calls: calls.clone(),
                });
                self.state = LoopState::AwaitingToolResults;
                Ok(NextStep::Dispatch(calls))
            }
        }
    }

    /// Record the combined results for the pending calls. Only valid while
    /// `AwaitingToolResults`; always returns to `Drafting`.
    pub fn record_results(&mut self, results: Vec<ToolResult>) -> Result<LoopState, AgentError> {
        self.expect_state(LoopState::AwaitingToolResults, "operation results")?;
        self.turns.push(Turn::Results { results });
        self.state = LoopState::Drafting;
        Ok(self.state)
    }

    /// Force the session into `Aborted` unless it already finished.
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = LoopState::Aborted;
        }
    }

    fn finish(&mut self, text: String) -> NextStep {
        self.final_text = Some(text.clone());
        self.state = LoopState::Done;
        NextStep::Finish(text)
    }

    fn expect_state(&self, expected: LoopState, event: &'static str) -> Result<(), AgentError> {
        if self.state != expected {
            return Err(AgentError::InvalidTransition {
                state: self.state,
                event,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(name: &str) -> ReasoningReply {
        ReasoningReply::Operations {
            text: Some(format!("checking {name}")),
            calls: vec![ToolCall {
                id: format!("call_{name}"),
                name: name.to_string(),
                arguments: serde_json::json!({}),
            }],
        }
    }

    fn result(name: &str) -> Vec<ToolResult> {
        vec![ToolResult {
            call_id: format!("call_{name}"),
            operation: name.to_string(),
            content: "ok".into(),
            is_error: false,
        }]
    }

    #[test]
    fn test_final_reply_finishes() {
        let mut session = ReasoningSession::new("fever", 4);
        let step = session
            .record_reply(ReasoningReply::Final { text: "{}".into() })
            .unwrap();
        assert_eq!(step, NextStep::Finish("{}".into()));
        assert_eq!(session.state(), LoopState::Done);
        assert!(session.turns().is_empty());
    }

    #[test]
    fn test_tool_round_trip_alternates() {
        let mut session = ReasoningSession::new("fever", 4);
        let step = session.record_reply(ops("search_nice_guidelines")).unwrap();
        assert!(matches!(step, NextStep::Dispatch(ref calls) if calls.len() == 1));
        assert_eq!(session.state(), LoopState::AwaitingToolResults);

        let state = session.record_results(result("search_nice_guidelines")).unwrap();
        assert_eq!(state, LoopState::Drafting);
        assert_eq!(session.turns().len(), 2);
        assert!(matches!(session.turns()[0], Turn::Reasoning { .. }));
        assert!(matches!(session.turns()[1], Turn::Results { .. }));
    }

    #[test]
    fn test_two_replies_in_a_row_rejected() {
        let mut session = ReasoningSession::new("fever", 4);
        session.record_reply(ops("a")).unwrap();
        let err = session.record_reply(ops("b")).unwrap_err();
        assert!(matches!(
            err,
            AgentError::InvalidTransition {
                state: LoopState::AwaitingToolResults,
                ..
            }
        ));
    }

    #[test]
    fn test_results_without_request_rejected() {
        let mut session = ReasoningSession::new("fever", 4);
        assert!(session.record_results(result("a")).is_err());
    }

    #[test]
    fn test_tool_use_on_last_turn_aborts_without_dispatch() {
        let mut session = ReasoningSession::new("fever", 2);
        session.record_reply(ops("a")).unwrap();
        assert_eq!(session.record_results(result("a")).unwrap(), LoopState::Drafting);

        let step = session.record_reply(ops("b")).unwrap();
        assert_eq!(step, NextStep::Abort);
        assert_eq!(session.state(), LoopState::Aborted);
        assert_eq!(session.reasoning_turns(), 2);
        assert!(session.record_results(result("b")).is_err());
        assert!(session.record_reply(ops("c")).is_err());
        assert_eq!(session.last_text(), Some("checking b"));
    }

    #[test]
    fn test_final_reply_on_last_turn_still_finishes() {
        let mut session = ReasoningSession::new("fever", 1);
        let step = session
            .record_reply(ReasoningReply::Final { text: "{}".into() })
            .unwrap();
        assert_eq!(step, NextStep::Finish("{}".into()));
        assert_eq!(session.state(), LoopState::Done);
    }

    #[test]
    fn test_empty_operations_reply_is_final() {
        let mut session = ReasoningSession::new("fever", 2);
        let step = session
            .record_reply(ReasoningReply::Operations {
                text: Some("done".into()),
                calls: vec![],
            })
            .unwrap();
        assert_eq!(step, NextStep::Finish("done".into()));
        assert_eq!(session.state(), LoopState::Done);
    }

    #[test]
    fn test_zero_ceiling_raised_to_one() {
        assert_eq!(ReasoningSession::new("x", 0).max_turns(), 1);
    }

    #[test]
    fn test_abort_keeps_done() {
        let mut session = ReasoningSession::new("x", 1);
        session
            .record_reply(ReasoningReply::Final { text: String::new() })
            .unwrap();
        session.abort();
        assert_eq!(session.state(), LoopState::Done);
    }
}
