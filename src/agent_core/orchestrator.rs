//! AgentLoop: drives one [`ReasoningSession`] against the reasoning service
//! and the connected capability servers.
//!
//! Strictly sequential between turns; the operations of a single turn are
//! dispatched concurrently by the [`ToolRouter`].

use serde::Serialize;

use crate::inference::{ReasoningRequest, ReasoningService};
use crate::mcp_client::McpClient;

use super::answer::{parse_structured_answer, ParseMode, StructuredAnswer};
use super::conversation::{LoopState, NextStep, ReasoningSession};
use super::errors::AgentError;
use super::tool_router::ToolRouter;

/// Instructions sent as the system message of every session.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a clinical decision-support assistant. Use the available tools to \
consult local clinical guidelines, drug references and patient context before \
answering. Call tools whenever you need evidence; you may call several at once.

When you have enough information, reply with ONLY a JSON object of this shape \
and no other text:
{\"diagnoses\": [{\"label\": string, \"confidence\": \"high\" | \"medium\" | \"low\", \
\"treatments\": [{\"name\": string, \"notes\": string, \"drug_ids\": [string]}]}]}

Use generic drug names in drug_ids. Order diagnoses from most to least likely.";

/// How one loop run ended.
#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    /// `Done` or `Aborted`.
    pub state: LoopState,
    pub answer: StructuredAnswer,
    pub parse_mode: ParseMode,
    pub reasoning_turns: usize,
    pub operations_called: usize,
}

pub struct AgentLoop<'a> {
    reasoner: &'a dyn ReasoningService,
    router: &'a ToolRouter,
    system_prompt: &'a str,
    max_turns: usize,
}

impl<'a> AgentLoop<'a> {
    pub fn new(reasoner: &'a dyn ReasoningService, router: &'a ToolRouter, max_turns: usize) -> Self {
        Self {
            reasoner,
            router,
            system_prompt: DEFAULT_SYSTEM_PROMPT,
            max_turns,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: &'a str) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    /// Run the loop to `Done` or `Aborted`.
    ///
    /// Only a reasoning-service failure is an error. An aborted session still
    /// yields whatever answer the last reasoning text contains.
    pub async fn run(&self, client: &McpClient, scenario: &str) -> Result<LoopOutcome, AgentError> {
        let catalog = client.catalog();
        let mut session = ReasoningSession::new(scenario, self.max_turns);
        let mut operations_called = 0;

        while session.state() == LoopState::Drafting {
            let round = session.reasoning_turns();
            tracing::info!(
                round,
                turn_count = session.turns().len(),
                operation_count = catalog.len(),
                "reasoning round start"
            );

            let reply = self
                .reasoner
                .reason(ReasoningRequest {
                    system_prompt: self.system_prompt,
                    scenario: session.scenario(),
                    turns: session.turns(),
                    catalog: &catalog,
                })
                .await?;

            match session.record_reply(reply)? {
                NextStep::Finish(text) => {
                    tracing::info!(round, text_len = text.len(), "final answer received");
                }
                NextStep::Dispatch(calls) => {
                    tracing::info!(round, tool_count = calls.len(), "executing operations");
                    operations_called += calls.len();
                    let results = self.router.dispatch_turn(client, &calls).await;
                    let errors = results.iter().filter(|r| r.is_error).count();
                    if errors > 0 {
                        tracing::warn!(round, errors, "operations failed this round");
                    }
                    session.record_results(results)?;
                }
                NextStep::Abort => {
                    tracing::warn!(
                        max_turns = session.max_turns(),
                        "turn ceiling reached, aborting session"
                    );
                }
            }
        }

        let (answer, parse_mode) = match session.last_text() {
            Some(text) => parse_structured_answer(text),
            None => (StructuredAnswer::default(), ParseMode::Empty),
        };

        Ok(LoopOutcome {
            state: session.state(),
            answer,
            parse_mode,
            reasoning_turns: session.reasoning_turns(),
            operations_called,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::cache::{CachePolicy, ResultCache};
    use crate::inference::{InferenceError, ReasoningReply, ScriptedReasoner, ToolCall, Turn};
    use crate::mcp_client::{ServerSpec, StubLauncher, StubServer};

    async fn client_with(server: StubServer) -> McpClient {
        let specs = vec![ServerSpec::new("guides", Default::default())];
        let mut client = McpClient::new();
        client
            .connect(&StubLauncher::new(vec![server]), &specs)
            .await
            .unwrap();
        client
    }

    fn router() -> ToolRouter {
        ToolRouter::new(
            Arc::new(ResultCache::disabled()),
            Arc::new(CachePolicy::none()),
            6_000,
        )
        .with_retries(0, Duration::ZERO)
    }

    fn search_call() -> ReasoningReply {
        ReasoningReply::Operations {
            text: None,
            calls: vec![ToolCall {
                id: "c1".into(),
                name: "search_who_guidelines".into(),
                arguments: serde_json::json!({"query": "malaria"}),
            }],
        }
    }

    #[tokio::test]
    async fn test_tool_turn_then_final() {
        let client = client_with(
            StubServer::new("guides", &["search_who_guidelines"])
                .with_reply("search_who_guidelines", serde_json::json!("artemisinin combination")),
        )
        .await;
        let reasoner = ScriptedReasoner::new(vec![
            search_call(),
            ReasoningReply::Final {
                text: r#"{"diagnoses":[{"label":"Malaria","confidence":"high","treatments":[{"name":"ACT","drug_ids":["artemether"]}]}]}"#.into(),
            },
        ]);
        let router = router();

        let outcome = AgentLoop::new(&reasoner, &router, 5)
            .run(&client, "fever after travel")
            .await
            .unwrap();

        assert_eq!(outcome.state, LoopState::Done);
        assert_eq!(outcome.parse_mode, ParseMode::Strict);
        assert_eq!(outcome.answer.diagnoses[0].label, "Malaria");
        assert_eq!(outcome.reasoning_turns, 2);
        assert_eq!(outcome.operations_called, 1);

        // The second call saw the reasoning turn and its results.
        let seen = reasoner.seen_turns();
        assert!(seen[0].is_empty());
        assert_eq!(seen[1].len(), 2);
        match &seen[1][1] {
            Turn::Results { results } => assert_eq!(results[0].content, "artemisinin combination"),
            other => panic!("expected results turn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_always_calling_reasoner_hits_ceiling() {
        let client = client_with(StubServer::new("guides", &["search_who_guidelines"])).await;
        let reasoner =
            ScriptedReasoner::looping("search_who_guidelines", serde_json::json!({"query": "x"}));
        let router = router();

        let outcome = AgentLoop::new(&reasoner, &router, 3)
            .run(&client, "cough")
            .await
            .unwrap();

        assert_eq!(outcome.state, LoopState::Aborted);
        assert_eq!(reasoner.call_count(), 3);
        assert_eq!(outcome.reasoning_turns, 3);
        // The last turn's request is never run: its results would go unread.
        assert_eq!(outcome.operations_called, 2);
        assert!(outcome.answer.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_final_is_empty_answer() {
        let client = client_with(StubServer::new("guides", &["search_who_guidelines"])).await;
        let reasoner = ScriptedReasoner::new(vec![ReasoningReply::Final {
            text: "Sorry, I cannot help with that.".into(),
        }]);
        let router = router();

        let outcome = AgentLoop::new(&reasoner, &router, 3)
            .run(&client, "rash")
            .await
            .unwrap();
        assert_eq!(outcome.state, LoopState::Done);
        assert_eq!(outcome.parse_mode, ParseMode::Empty);
        assert!(outcome.answer.is_empty());
    }

    #[tokio::test]
    async fn test_reasoning_failure_propagates() {
        let client = client_with(StubServer::new("guides", &["search_who_guidelines"])).await;
        let reasoner = ScriptedReasoner::new(vec![]).then_fail("model offline");
        let router = router();

        let err = AgentLoop::new(&reasoner, &router, 3)
            .run(&client, "rash")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Inference(InferenceError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_routing_miss_is_fed_back() {
        let client = client_with(StubServer::new("guides", &["search_who_guidelines"])).await;
        let reasoner = ScriptedReasoner::new(vec![
            ReasoningReply::Operations {
                text: None,
                calls: vec![ToolCall {
                    id: "c1".into(),
                    name: "search_who_guideline".into(),
                    arguments: serde_json::json!({}),
                }],
            },
            ReasoningReply::Final {
                text: r#"{"diagnoses":[]}"#.into(),
            },
        ]);
        let router = router();

        let outcome = AgentLoop::new(&reasoner, &router, 3)
            .run(&client, "rash")
            .await
            .unwrap();
        assert_eq!(outcome.state, LoopState::Done);

        match &reasoner.seen_turns()[1][1] {
            Turn::Results { results } => {
                assert!(results[0].is_error);
                assert!(results[0].content.contains("search_who_guidelines"));
            }
            other => panic!("expected results turn, got {other:?}"),
        }
    }
}
