//! Orchestrator: drives one request through the stage pipeline.
//!
//! ```text
//! PENDING → RUNNING(front) → RUNNING(back) → RUNNING(qa) → DONE
//!                 └──────────────┴──────────────┴──→ ERROR(stage)
//! ```
//!
//! Stages that were not requested are skipped. A stage whose output fails
//! its contract, or whose generation call fails for good, stops the run in
//! `ERROR(stage)`; later stages never run. Full and partial runs are both
//! persisted, with the failed stage's response left empty.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::invoker::{AgentInvoker, RetryPolicy, UpstreamError};
use super::prompts::{PromptBuilder, StageInput};
use super::stage::PIPELINE;
use super::validator::{ContractValidator, ValidationContext};
use crate::generation::{GenerationClient, GenerationConfig};
use crate::models::auth::UserId;
use crate::models::run::{
    AgentKind, AgentResult, DEFAULT_LANGUAGE, GenerationRequest, RunId, RunRecord, RunStatus,
    StageFailure,
};
use crate::store::{RunRepository, StoreError};
use crate::uuid::uuidv7;

/// Client-safe reason recorded for a stage whose generation call failed.
pub const UPSTREAM_FAILURE_REASON: &str = "generation service unavailable";

/// Pipeline errors. Contract violations are not errors: they come back as a
/// partial [`RunOutcome`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// The generation service failed after retries. The partial run was
    /// persisted as `run_id` unless persisting it failed too.
    #[error("{stage} stage failed: {source}")]
    Upstream {
        stage: AgentKind,
        run_id: Option<RunId>,
        #[source]
        source: UpstreamError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Where a run is in the stage machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Running(AgentKind),
    Done,
    Error(AgentKind),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Pending => f.write_str("PENDING"),
            PipelineState::Running(a) => write!(f, "RUNNING({a})"),
            PipelineState::Done => f.write_str("DONE"),
            PipelineState::Error(a) => write!(f, "ERROR({a})"),
        }
    }
}

/// Bundle returned for a completed or contract-violating run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub task: String,
    pub language: String,
    pub preset: Option<String>,
    pub state: PipelineState,
    pub status: RunStatus,
    /// One result per stage that produced output, in pipeline order,
    /// including a failed stage's rejected output.
    pub results: Vec<AgentResult>,
    pub error: Option<StageFailure>,
}

impl RunOutcome {
    /// Accepted response of a stage; `None` if it was skipped or failed.
    pub fn response(&self, agent: AgentKind) -> Option<&str> {
        self.results
            .iter()
            .find(|r| r.agent_type == agent && r.valid)
            .map(|r| r.response.as_str())
    }
}

/// Runs the agent sequence for one request at a time. Holds no per-run
/// state, so one instance serves concurrent requests.
pub struct Orchestrator {
    invoker: AgentInvoker,
    prompts: Arc<dyn PromptBuilder>,
    validator: ContractValidator,
    runs: Arc<dyn RunRepository>,
    generation: GenerationConfig,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        prompts: Arc<dyn PromptBuilder>,
        runs: Arc<dyn RunRepository>,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            invoker: AgentInvoker::new(client, RetryPolicy::from_config(&generation)),
            prompts,
            validator: ContractValidator,
            runs,
            generation,
        }
    }

    /// Run the pipeline for `request` and persist the result.
    pub async fn run(&self, request: GenerationRequest) -> Result<RunOutcome, PipelineError> {
        let mut state = PipelineState::Pending;
        let request = validate_request(request)?;
        let run_id = uuidv7();
        info!(
            %run_id,
            task_digest = %task_digest(&request.task),
            language = %request.language,
            agents = request.agents.len(),
            %state,
            "pipeline started"
        );

        let mut results: Vec<AgentResult> = Vec::new();
        let mut failure: Option<StageFailure> = None;
        let mut upstream: Option<UpstreamError> = None;

        for stage in PIPELINE {
            if !request.agents.contains(stage.agent) {
                debug!(%run_id, agent = %stage.agent, "stage not requested, skipping");
                continue;
            }
            state = PipelineState::Running(stage.agent);
            info!(%run_id, %state, "stage started");

            let prior: Vec<AgentResult> = results
                .iter()
                .filter(|r| r.valid && stage.depends_on.contains(&r.agent_type))
                .cloned()
                .collect();
            let input = StageInput {
                task: &request.task,
                language: &request.language,
                preset: request.preset.as_deref(),
                prior: &prior,
            };
            let prompt = self.prompts.build(stage.agent, &input);
            let model = self.generation.model_for(stage.agent);

            let mut result = match self
                .invoker
                .invoke(stage.agent, &prompt, &model, self.generation.timeout)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    state = PipelineState::Error(stage.agent);
                    warn!(%run_id, %state, attempts = e.attempts, "generation failed");
                    failure = Some(StageFailure {
                        stage: stage.agent,
                        reason: UPSTREAM_FAILURE_REASON.into(),
                    });
                    upstream = Some(e);
                    break;
                }
            };

            let ctx = ValidationContext {
                task: &request.task,
                prior: &prior,
            };
            let verdict = self.validator.validate(stage.agent, &result.response, &ctx);
            result.valid = verdict.ok;
            info!(
                %run_id,
                agent = %stage.agent,
                attempts = result.attempts,
                duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
                valid = result.valid,
                "stage finished"
            );
            results.push(result);

            if !verdict.ok {
                state = PipelineState::Error(stage.agent);
                let reason = verdict
                    .reason
                    .unwrap_or_else(|| format!("{} contract violated", stage.agent));
                warn!(%run_id, %state, %reason, "contract violation, stopping pipeline");
                failure = Some(StageFailure {
                    stage: stage.agent,
                    reason,
                });
                break;
            }
        }

        let status = match (&failure, &upstream) {
            (None, _) => {
                state = PipelineState::Done;
                RunStatus::Done
            }
            (Some(_), Some(_)) => RunStatus::UpstreamError,
            (Some(_), None) => RunStatus::ContractViolation,
        };

        let outcome = RunOutcome {
            run_id,
            task: request.task,
            language: request.language,
            preset: request.preset,
            state,
            status,
            results,
            error: failure,
        };
        let persisted = self.persist(&outcome, request.user_id).await;

        if let Some(source) = upstream {
            if let Err(e) = &persisted {
                error!(%run_id, error = %e, "failed to persist partial run");
            }
            return Err(PipelineError::Upstream {
                stage: source.agent,
                run_id: persisted.ok(),
                source,
            });
        }
        persisted?;
        info!(%run_id, %state, status = status.as_str(), "pipeline finished");
        Ok(outcome)
    }

    async fn persist(
        &self,
        outcome: &RunOutcome,
        user_id: Option<UserId>,
    ) -> Result<RunId, StoreError> {
        let accepted =
            |agent: AgentKind| outcome.response(agent).unwrap_or_default().to_string();
        let record = RunRecord {
            id: outcome.run_id,
            task: outcome.task.clone(),
            language: outcome.language.clone(),
            preset: outcome.preset.clone(),
            status: outcome.status,
            front_response: accepted(AgentKind::Front),
            back_response: accepted(AgentKind::Back),
            qa_response: accepted(AgentKind::Qa),
            error: outcome.error.clone(),
            user_id,
            created_at: Utc::now(),
        };
        let run_id = self.runs.save_run_with_agents(&record, &outcome.results).await?;
        debug!(%run_id, rows = outcome.results.len(), "run persisted");
        Ok(run_id)
    }
}

fn validate_request(mut request: GenerationRequest) -> Result<GenerationRequest, PipelineError> {
    if request.task.trim().is_empty() {
        return Err(PipelineError::Validation("Field 'task' is required".into()));
    }
    if request.agents.is_empty() {
        return Err(PipelineError::Validation(
            "At least one agent must be requested".into(),
        ));
    }
    if request.language.trim().is_empty() {
        request.language = DEFAULT_LANGUAGE.to_string();
    }
    Ok(request)
}

/// Short digest so logs can correlate runs without carrying task text.
fn task_digest(task: &str) -> String {
    let digest = Sha256::digest(task.as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::generation::{CompletionRequest, ServiceError};
    use crate::models::run::AgentSet;
    use crate::pipeline::prompts::DefaultPrompts;
    use crate::store::MemoryStore;

    const FRONT: &str = "```html\n<form id=\"login-form\"><input name=\"email\"></form>\n```\n```js\nfunction submitLogin() { fetch('/api/login', { method: 'POST' }); }\n```";
    const BACK: &str = "```python\n@app.route('/api/login', methods=['POST'])\ndef login_user():\n    return {'ok': True}\n```";
    const QA: &str = "Test case 1: submit login-form.\nExpected result: POST /api/login returns 200.\n```python\ndef test_login_user(client):\n    assert client.post('/api/login').status_code == 200\n```";

    #[derive(Default)]
    struct Recording {
        replies: Mutex<VecDeque<Result<String, ServiceError>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl Recording {
        fn new(replies: Vec<Result<&str, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(|r| r.map(String::from)).collect()),
                requests: Mutex::default(),
            })
        }

        async fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().await.clone()
        }
    }

    #[async_trait]
    impl GenerationClient for Recording {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
            self.requests.lock().await.push(request.clone());
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(ServiceError::Malformed("no scripted reply".into())))
        }
    }

    fn orchestrator(client: Arc<Recording>, store: &MemoryStore) -> Orchestrator {
        let config = GenerationConfig {
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
            ..GenerationConfig::default()
        };
        Orchestrator::new(
            client,
            Arc::new(DefaultPrompts),
            Arc::new(store.clone()),
            config,
        )
    }

    #[tokio::test]
    async fn full_run_persists_all_stages() {
        let client = Recording::new(vec![Ok(FRONT), Ok(BACK), Ok(QA)]);
        let store = MemoryStore::new();
        let user = uuidv7();
        let outcome = orchestrator(client.clone(), &store)
            .run(GenerationRequest::new("Build a login form").with_user(user))
            .await
            .unwrap();

        assert_eq!(outcome.state, PipelineState::Done);
        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(outcome.response(AgentKind::Qa), Some(QA));

        let runs = store.all_runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].front_response, FRONT);
        assert_eq!(runs[0].back_response, BACK);
        assert_eq!(runs[0].qa_response, QA);
        assert_eq!(runs[0].user_id, Some(user));
        assert_eq!(store.agent_runs(outcome.run_id).len(), 3);
    }

    #[tokio::test]
    async fn qa_prompt_embeds_front_and_back_verbatim() {
        let client = Recording::new(vec![Ok(FRONT), Ok(BACK), Ok(QA)]);
        let store = MemoryStore::new();
        orchestrator(client.clone(), &store)
            .run(GenerationRequest::new("Build a login form"))
            .await
            .unwrap();

        let requests = client.requests().await;
        assert_eq!(requests.len(), 3);
        let qa = &requests[2];
        assert!(qa.user.contains(FRONT));
        assert!(qa.user.contains(BACK));
        // Front and back prompts do not see other outputs.
        assert!(!requests[1].user.contains(FRONT));
    }

    #[tokio::test]
    async fn invalid_front_stops_before_back_and_qa() {
        let client = Recording::new(vec![Ok(""), Ok(BACK), Ok(QA)]);
        let store = MemoryStore::new();
        let outcome = orchestrator(client.clone(), &store)
            .run(GenerationRequest::new("Build a login form"))
            .await
            .unwrap();

        assert_eq!(outcome.state, PipelineState::Error(AgentKind::Front));
        assert_eq!(outcome.status, RunStatus::ContractViolation);
        assert_eq!(outcome.error.as_ref().unwrap().stage, AgentKind::Front);
        assert_eq!(client.requests().await.len(), 1);

        let run = &store.all_runs()[0];
        assert_eq!(run.front_response, "");
        assert_eq!(run.back_response, "");
        assert_eq!(run.qa_response, "");
        let rows = store.agent_runs(run.id);
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].valid);
    }

    #[tokio::test]
    async fn invalid_back_keeps_front_output() {
        let client = Recording::new(vec![Ok(FRONT), Ok("no code here"), Ok(QA)]);
        let store = MemoryStore::new();
        let outcome = orchestrator(client.clone(), &store)
            .run(GenerationRequest::new("Build a login form"))
            .await
            .unwrap();

        assert_eq!(outcome.state, PipelineState::Error(AgentKind::Back));
        assert_eq!(outcome.response(AgentKind::Front), Some(FRONT));
        assert_eq!(outcome.response(AgentKind::Back), None);
        let run = &store.all_runs()[0];
        assert_eq!(run.front_response, FRONT);
        assert_eq!(run.back_response, "");
        assert_eq!(client.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn generic_qa_stops_in_qa_error() {
        let generic = "Test case 1: open the application and check it works.\n\
                       Expected result: it works.";
        let client = Recording::new(vec![Ok(FRONT), Ok(BACK), Ok(generic)]);
        let store = MemoryStore::new();
        let outcome = orchestrator(client.clone(), &store)
            .run(GenerationRequest::new("Build a login form"))
            .await
            .unwrap();

        assert_eq!(outcome.state, PipelineState::Error(AgentKind::Qa));
        assert_eq!(outcome.status, RunStatus::ContractViolation);
        assert_eq!(outcome.response(AgentKind::Back), Some(BACK));
        assert_eq!(outcome.response(AgentKind::Qa), None);

        let run = &store.all_runs()[0];
        assert_eq!(run.front_response, FRONT);
        assert_eq!(run.back_response, BACK);
        assert_eq!(run.qa_response, "");
        assert_eq!(run.error.as_ref().unwrap().stage, AgentKind::Qa);
        let rows = store.agent_runs(run.id);
        assert_eq!(rows.len(), 3);
        assert!(rows[..2].iter().all(|r| r.valid));
        assert!(!rows[2].valid);
        assert_eq!(rows[2].response, generic);
    }

    #[tokio::test]
    async fn empty_task_makes_no_calls_and_persists_nothing() {
        let client = Recording::new(vec![Ok(FRONT)]);
        let store = MemoryStore::new();
        let err = orchestrator(client.clone(), &store)
            .run(GenerationRequest::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(client.requests().await.is_empty());
        assert!(store.all_runs().is_empty());
    }

    #[tokio::test]
    async fn front_only_run() {
        let client = Recording::new(vec![Ok(FRONT)]);
        let store = MemoryStore::new();
        let agents = AgentSet::from_names(&["front"]).unwrap();
        let outcome = orchestrator(client.clone(), &store)
            .run(GenerationRequest::new("Build a login form").with_agents(agents))
            .await
            .unwrap();

        assert_eq!(outcome.state, PipelineState::Done);
        assert_eq!(outcome.results.len(), 1);
        let run = &store.all_runs()[0];
        assert_eq!(run.front_response, FRONT);
        assert_eq!(run.back_response, "");
        assert_eq!(run.qa_response, "");
    }

    #[tokio::test]
    async fn upstream_failure_persists_partial_run() {
        let client = Recording::new(vec![Ok(FRONT), Err(ServiceError::Unauthorized)]);
        let store = MemoryStore::new();
        let err = orchestrator(client.clone(), &store)
            .run(GenerationRequest::new("Build a login form"))
            .await
            .unwrap_err();

        let PipelineError::Upstream { stage, run_id, source } = err else {
            panic!("expected upstream error");
        };
        assert_eq!(stage, AgentKind::Back);
        assert_eq!(source.source, ServiceError::Unauthorized);
        let run = &store.all_runs()[0];
        assert_eq!(Some(run.id), run_id);
        assert_eq!(run.status, RunStatus::UpstreamError);
        assert_eq!(run.front_response, FRONT);
        assert_eq!(run.error.as_ref().unwrap().reason, UPSTREAM_FAILURE_REASON);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_a_stage() {
        let client = Recording::new(vec![
            Err(ServiceError::Timeout),
            Err(ServiceError::RateLimited),
            Ok(FRONT),
        ]);
        let store = MemoryStore::new();
        let outcome = orchestrator(client.clone(), &store)
            .run(
                GenerationRequest::new("Build a login form")
                    .with_agents(AgentSet::from_names(&["front"]).unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(outcome.results[0].attempts, 3);
        assert_eq!(outcome.response(AgentKind::Front), Some(FRONT));
    }

    #[test]
    fn blank_language_defaults() {
        let req = validate_request(GenerationRequest::new("x").with_language(" ")).unwrap();
        assert_eq!(req.language, DEFAULT_LANGUAGE);
    }

    #[test]
    fn digest_is_short_and_stable() {
        assert_eq!(task_digest("abc"), task_digest("abc"));
        assert_eq!(task_digest("abc").len(), 12);
    }
}
