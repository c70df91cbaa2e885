//! Agent invoker: one stage's call to the generation service, with a
//! per-attempt timeout and an explicit retry policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::prompts::Prompt;
use crate::generation::{
    CompletionRequest, GenerationClient, GenerationConfig, ModelConfig, ServiceError,
};
use crate::models::run::{AgentKind, AgentResult};

/// Retry schedule for transient generation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Factor applied to the delay for each further retry.
    pub multiplier: u32,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
            ..Self::default()
        }
    }

    /// Whether `err` should be retried after `retries_done` retries.
    pub fn should_retry(&self, err: &ServiceError, retries_done: u32) -> bool {
        err.is_transient() && retries_done < self.max_retries
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// A stage's generation call failed for good.
#[derive(Debug, Clone, Error)]
#[error("{agent} generation failed after {attempts} attempt(s): {source}")]
pub struct UpstreamError {
    pub agent: AgentKind,
    pub attempts: u32,
    pub elapsed: Duration,
    /// The last underlying failure.
    #[source]
    pub source: ServiceError,
}

/// Calls the generation service on behalf of one agent stage.
#[derive(Clone)]
pub struct AgentInvoker {
    client: Arc<dyn GenerationClient>,
    policy: RetryPolicy,
}

impl AgentInvoker {
    pub fn new(client: Arc<dyn GenerationClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `prompt` for `agent`, retrying transient failures.
    ///
    /// `per_call_timeout` bounds each attempt on its own; backoff sleeps are
    /// not counted against it. The returned duration covers every attempt
    /// and sleep. The result comes back with `valid = false`; the contract
    /// check is the orchestrator's.
    pub async fn invoke(
        &self,
        agent: AgentKind,
        prompt: &Prompt,
        model: &ModelConfig,
        per_call_timeout: Duration,
    ) -> Result<AgentResult, UpstreamError> {
        let request = CompletionRequest {
            system: prompt.system.clone(),
            user: prompt.user.clone(),
            model: model.clone(),
        };
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = match timeout(per_call_timeout, self.client.complete(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ServiceError::Timeout),
            };

            match outcome {
                Ok(response) => {
                    let duration = started.elapsed();
                    debug!(%agent, attempts, ?duration, "agent call succeeded");
                    return Ok(AgentResult {
                        agent_type: agent,
                        prompt: prompt.user.clone(),
                        response,
                        duration,
                        attempts,
                        valid: false,
                    });
                }
                Err(err) => {
                    let retries_done = attempts - 1;
                    if !self.policy.should_retry(&err, retries_done) {
                        warn!(%agent, attempts, error = %err, "agent call failed");
                        return Err(UpstreamError {
                            agent,
                            attempts,
                            elapsed: started.elapsed(),
                            source: err,
                        });
                    }
                    let delay = self.policy.backoff(retries_done);
                    warn!(%agent, attempts, ?delay, error = %err, "transient failure, retrying");
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;

    /// Scripted client: each call pops the next step.
    enum Step {
        Hang(Duration),
        Fail(ServiceError),
        Reply(&'static str),
    }

    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerationClient for Scripted {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ServiceError> {
            *self.calls.lock().await += 1;
            let step = self.steps.lock().await.pop_front();
            match step {
                Some(Step::Hang(d)) => {
                    sleep(d).await;
                    Ok("too late".into())
                }
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Reply(text)) => Ok(text.into()),
                None => Err(ServiceError::Malformed("script exhausted".into())),
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(5),
            multiplier: 2,
            max_backoff: Duration::from_millis(50),
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "sys".into(),
            user: "user".into(),
        }
    }

    fn model() -> ModelConfig {
        GenerationConfig::default().model_for(AgentKind::Front)
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let p = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2,
            max_backoff: Duration::from_millis(1000),
        };
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(2), Duration::from_millis(400));
        assert_eq!(p.backoff(5), Duration::from_millis(1000));
        assert_eq!(p.backoff(40), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn two_timeouts_then_success() {
        let client = Scripted::new(vec![
            Step::Hang(Duration::from_millis(200)),
            Step::Hang(Duration::from_millis(200)),
            Step::Reply("```html\n<div></div>\n```"),
        ]);
        let invoker = AgentInvoker::new(client.clone(), fast_policy());
        let result = invoker
            .invoke(AgentKind::Front, &prompt(), &model(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(result.response, "```html\n<div></div>\n```");
        assert_eq!(result.attempts, 3);
        assert_eq!(*client.calls.lock().await, 3);
        // Two timed-out attempts plus two backoff sleeps.
        assert!(result.duration >= Duration::from_millis(20 + 20 + 5 + 10));
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let client = Scripted::new(vec![
            Step::Fail(ServiceError::RateLimited),
            Step::Fail(ServiceError::Unavailable { status: 503 }),
            Step::Fail(ServiceError::Unavailable { status: 502 }),
            Step::Reply("never reached"),
        ]);
        let invoker = AgentInvoker::new(client.clone(), fast_policy());
        let err = invoker
            .invoke(AgentKind::Back, &prompt(), &model(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.source, ServiceError::Unavailable { status: 502 });
        assert_eq!(*client.calls.lock().await, 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        for fatal in [
            ServiceError::Unauthorized,
            ServiceError::QuotaExhausted,
            ServiceError::BadRequest("status 400".into()),
        ] {
            let client = Scripted::new(vec![Step::Fail(fatal.clone()), Step::Reply("x")]);
            let invoker = AgentInvoker::new(client.clone(), fast_policy());
            let err = invoker
                .invoke(AgentKind::Qa, &prompt(), &model(), Duration::from_secs(1))
                .await
                .unwrap_err();
            assert_eq!(err.attempts, 1);
            assert_eq!(err.source, fatal);
            assert_eq!(*client.calls.lock().await, 1);
        }
    }
}
