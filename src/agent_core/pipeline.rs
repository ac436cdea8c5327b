//! Consultation: one end-to-end request.
//!
//! compose region → connect servers → reasoning loop → enrichment → cleanup.
//!
//! Servers are connected eagerly per consultation and released on every
//! exit path: `cleanup()` runs after success, failure and session timeout,
//! and children are spawned `kill_on_drop` so a dropped consultation future
//! still reaps them.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CachePolicy, ResultCache};
use crate::config::MedrouteConfig;
use crate::inference::{InferenceClient, ReasoningService};
use crate::mcp_client::{McpClient, ProcessLauncher, ServerLauncher};
use crate::region::{RegionComposer, ResolvedRegion};

use super::answer::{ParseMode, StructuredAnswer};
use super::conversation::LoopState;
use super::enrichment::enrich_answer;
use super::errors::AgentError;
use super::orchestrator::{AgentLoop, LoopOutcome};
use super::tool_router::ToolRouter;
use super::types::AgentSettings;

/// What a consultation produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConsultationReport {
    pub session_id: String,
    /// Region code actually used.
    pub region: String,
    pub is_fallback: bool,
    pub servers: Vec<String>,
    pub state: LoopState,
    pub parse_mode: ParseMode,
    pub answer: StructuredAnswer,
    pub reasoning_turns: usize,
    pub operations_called: usize,
    /// Drugs that received an enrichment record.
    pub enriched_drugs: usize,
    pub elapsed_ms: u64,
}

pub struct Consultation {
    composer: RegionComposer,
    launcher: Arc<dyn ServerLauncher>,
    reasoner: Arc<dyn ReasoningService>,
    router: ToolRouter,
    settings: AgentSettings,
}

impl Consultation {
    pub fn new(
        composer: RegionComposer,
        launcher: Arc<dyn ServerLauncher>,
        reasoner: Arc<dyn ReasoningService>,
        cache: Arc<ResultCache>,
        policy: CachePolicy,
        settings: AgentSettings,
    ) -> Self {
        let router = ToolRouter::new(cache, Arc::new(policy), settings.max_tool_result_chars);
        Self {
            composer,
            launcher,
            reasoner,
            router,
            settings,
        }
    }

    /// Wire the production pieces from config: subprocess launcher, HTTP
    /// reasoning client, SQLite cache and the built-in cache policy merged
    /// with configured rules.
    pub fn from_config(config: &MedrouteConfig) -> Result<Self, AgentError> {
        let composer = RegionComposer::new(config.regions.clone())?;
        let reasoner = InferenceClient::from_config(config.reasoning.clone())?;
        let cache = ResultCache::from_config(&config.cache);
        let policy = CachePolicy::builtin().with_rules(&config.cache.rules);

        Ok(Self::new(
            composer,
            Arc::new(ProcessLauncher::new(None)),
            Arc::new(reasoner),
            Arc::new(cache),
            policy,
            config.agent.clone(),
        ))
    }

    /// Replace the router, e.g. to change retry timing.
    pub fn with_router(mut self, router: ToolRouter) -> Self {
        self.router = router;
        self
    }

    pub fn composer(&self) -> &RegionComposer {
        &self.composer
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn cache(&self) -> &ResultCache {
        self.router.cache()
    }

    /// Run one consultation for `scenario` in `region`.
    ///
    /// Fails only on server startup failure, reasoning-service failure or
    /// session timeout. Unknown regions use the fallback region.
    pub async fn consult(&self, region: &str, scenario: &str) -> Result<ConsultationReport, AgentError> {
        let session_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("consult", session_id = %session_id);
        self.consult_inner(session_id, region, scenario)
            .instrument(span)
            .await
    }

    async fn consult_inner(
        &self,
        session_id: String,
        region: &str,
        scenario: &str,
    ) -> Result<ConsultationReport, AgentError> {
        let started = Instant::now();
        let resolved = self.composer.compose(region);
        tracing::info!(
            requested = region,
            region = %resolved.code,
            is_fallback = resolved.is_fallback,
            servers = resolved.servers.len(),
            "consultation start"
        );

        let mut client = McpClient::new().with_call_timeout(self.settings.call_timeout_ms);
        let timeout = self.settings.session_timeout();
        let result =
            tokio::time::timeout(timeout, self.run_session(&mut client, &resolved, scenario)).await;
        client.cleanup().await;

        let (outcome, enriched_drugs) = match result {
            Ok(inner) => inner?,
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "consultation timed out");
                return Err(AgentError::Timeout {
                    duration_secs: timeout.as_secs(),
                });
            }
        };

        let report = ConsultationReport {
            session_id,
            region: resolved.code.clone(),
            is_fallback: resolved.is_fallback,
            servers: resolved.server_names().iter().map(|s| s.to_string()).collect(),
            state: outcome.state,
            parse_mode: outcome.parse_mode,
            answer: outcome.answer,
            reasoning_turns: outcome.reasoning_turns,
            operations_called: outcome.operations_called,
            enriched_drugs,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            state = ?report.state,
            diagnoses = report.answer.diagnoses.len(),
            reasoning_turns = report.reasoning_turns,
            elapsed_ms = report.elapsed_ms,
            "consultation complete"
        );
        Ok(report)
    }

    async fn run_session(
        &self,
        client: &mut McpClient,
        resolved: &ResolvedRegion,
        scenario: &str,
    ) -> Result<(LoopOutcome, usize), AgentError> {
        client
            .connect(self.launcher.as_ref(), &resolved.servers)
            .await
            .map_err(AgentError::StartupFailure)?;

        let mut agent = AgentLoop::new(self.reasoner.as_ref(), &self.router, self.settings.max_turns);
        if let Some(prompt) = &self.settings.system_prompt {
            agent = agent.with_system_prompt(prompt);
        }
        let mut outcome = agent.run(client, scenario).await?;

        let mut enriched = 0;
        if self.settings.enrich {
            if let Some(lookup) = &resolved.drug_lookup {
                let records =
                    enrich_answer(&mut outcome.answer, &self.router, client, lookup).await;
                enriched = records.values().filter(|r| r.is_some()).count();
            }
        }

        Ok((outcome, enriched))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::SqliteCacheStore;
    use crate::inference::{ReasoningReply, ScriptedReasoner, ToolCall};
    use crate::mcp_client::{CallOutcome, McpError, StubLauncher, StubServer};

    struct Servers {
        guides: StubServer,
        drugs: StubServer,
        patient: StubServer,
    }

    fn gb_servers() -> Servers {
        Servers {
            guides: StubServer::new("nice_guidelines", &["search_nice_guidelines"])
                .with_reply("search_nice_guidelines", serde_json::json!("NG138: amoxicillin first line")),
            drugs: StubServer::new("bnf_drugs", &["search_bnf_drugs", "get_bnf_drug"])
                .with_handler("search_bnf_drugs", |args| {
                    Ok(CallOutcome::Content(serde_json::json!([{"drug_id": args["name"]}])))
                })
                .with_handler("get_bnf_drug", |args| {
                    Ok(CallOutcome::Content(serde_json::json!({"id": args["drug_id"], "dose": "500mg"})))
                }),
            patient: StubServer::new("patient_context", &["get_patient_context"])
                .with_reply("get_patient_context", serde_json::json!({"allergies": []})),
        }
    }

    fn consultation(
        servers: &Servers,
        reasoner: Arc<ScriptedReasoner>,
        settings: AgentSettings,
    ) -> Consultation {
        let launcher = StubLauncher::new(vec![
            servers.guides.clone(),
            servers.drugs.clone(),
            servers.patient.clone(),
        ]);
        let cache = ResultCache::new(Arc::new(SqliteCacheStore::open(":memory:").unwrap()));
        Consultation::new(
            RegionComposer::builtin(),
            Arc::new(launcher),
            reasoner,
            Arc::new(cache),
            CachePolicy::builtin(),
            settings,
        )
    }

    fn final_answer() -> ReasoningReply {
        ReasoningReply::Final {
            text: r#"{"diagnoses":[{"label":"Community-acquired pneumonia","confidence":"high",
                "treatments":[{"name":"Oral antibiotic","notes":"5 days","drug_ids":["amoxicillin"]}]}]}"#
                .into(),
        }
    }

    fn lookup_turn() -> ReasoningReply {
        ReasoningReply::Operations {
            text: Some("Checking guidance and history.".into()),
            calls: vec![
                ToolCall {
                    id: "c1".into(),
                    name: "search_nice_guidelines".into(),
                    arguments: serde_json::json!({"query": "pneumonia"}),
                },
                ToolCall {
                    id: "c2".into(),
                    name: "get_patient_context".into(),
                    arguments: serde_json::json!({}),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_consult_end_to_end() {
        let servers = gb_servers();
        let reasoner = Arc::new(ScriptedReasoner::new(vec![lookup_turn(), final_answer()]));
        let consultation = consultation(&servers, reasoner.clone(), AgentSettings::default());

        let report = consultation.consult(" uk ", "productive cough, fever").await.unwrap();

        assert_eq!(report.region, "GB");
        assert!(!report.is_fallback);
        assert_eq!(
            report.servers,
            vec!["nice_guidelines", "bnf_drugs", "patient_context"]
        );
        assert_eq!(report.state, LoopState::Done);
        assert_eq!(report.reasoning_turns, 2);
        assert_eq!(report.operations_called, 2);
        assert_eq!(report.enriched_drugs, 1);

        let treatment = &report.answer.diagnoses[0].treatments[0];
        let record = treatment.enrichment["amoxicillin"].as_ref().unwrap();
        assert_eq!(record.detail["dose"], "500mg");

        // Every server released exactly once.
        assert_eq!(servers.guides.close_count(), 1);
        assert_eq!(servers.drugs.close_count(), 1);
        assert_eq!(servers.patient.close_count(), 1);
    }

    #[tokio::test]
    async fn test_startup_failure_cleans_up() {
        let servers = gb_servers();
        // No patient_context server available.
        let launcher = StubLauncher::new(vec![servers.guides.clone(), servers.drugs.clone()]);
        let reasoner = Arc::new(ScriptedReasoner::new(vec![final_answer()]));
        let consultation = Consultation::new(
            RegionComposer::builtin(),
            Arc::new(launcher),
            reasoner.clone(),
            Arc::new(ResultCache::disabled()),
            CachePolicy::none(),
            AgentSettings::default(),
        );

        let err = consultation.consult("GB", "headache").await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::StartupFailure(McpError::SpawnFailed { .. })
        ));
        assert_eq!(reasoner.call_count(), 0);
        assert_eq!(servers.guides.close_count(), 1);
        assert_eq!(servers.drugs.close_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_region_uses_fallback() {
        let servers = Servers {
            guides: StubServer::new("who_guidelines", &["search_who_guidelines"]),
            drugs: StubServer::new("openfda_drugs", &["search_openfda_drugs", "get_openfda_drug"]),
            patient: StubServer::new("patient_context", &["get_patient_context"]),
        };
        let reasoner = Arc::new(ScriptedReasoner::new(vec![ReasoningReply::Final {
            text: r#"{"diagnoses":[]}"#.into(),
        }]));
        let consultation = consultation(&servers, reasoner, AgentSettings::default());

        let report = consultation.consult("Atlantis", "dizziness").await.unwrap();
        assert_eq!(report.region, "INTL");
        assert!(report.is_fallback);
        assert_eq!(report.enriched_drugs, 0);
        assert_eq!(servers.patient.close_count(), 1);
    }

    #[tokio::test]
    async fn test_turn_ceiling_reported_as_aborted() {
        let servers = gb_servers();
        let reasoner = Arc::new(ScriptedReasoner::looping(
            "search_nice_guidelines",
            serde_json::json!({"query": "again"}),
        ));
        let settings = AgentSettings {
            max_turns: 2,
            ..AgentSettings::default()
        };
        let consultation = consultation(&servers, reasoner.clone(), settings);

        let report = consultation.consult("GB", "fatigue").await.unwrap();
        assert_eq!(report.state, LoopState::Aborted);
        assert_eq!(reasoner.call_count(), 2);
        assert!(report.answer.is_empty());
        // Only the first turn's request ran; the second hit the ceiling.
        assert_eq!(report.operations_called, 1);
        assert_eq!(servers.guides.call_count(), 1);
    }

    #[tokio::test]
    async fn test_session_timeout_still_cleans_up() {
        let servers = Servers {
            guides: StubServer::new("nice_guidelines", &["search_nice_guidelines"])
                .with_delay(Duration::from_secs(10)),
            ..gb_servers()
        };
        let reasoner = Arc::new(ScriptedReasoner::new(vec![lookup_turn(), final_answer()]));
        let settings = AgentSettings {
            session_timeout_secs: 1,
            ..AgentSettings::default()
        };
        let consultation = consultation(&servers, reasoner, settings);

        let err = consultation.consult("GB", "chest pain").await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout { duration_secs: 1 }));
        assert_eq!(servers.guides.close_count(), 1);
        assert_eq!(servers.patient.close_count(), 1);
    }
}
