//! Generation service configuration.

use std::time::Duration;

use super::ModelConfig;
use crate::env::{env_nonempty, env_or};
use crate::models::run::AgentKind;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Resolved settings for the generation client and the agent invoker.
#[derive(Clone)]
pub struct GenerationConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Backoff before the first retry; doubled for each later one.
    pub initial_backoff: Duration,
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .finish()
    }
}

impl GenerationConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                  | Default                       |
    /// |---------------------------|-------------------------------|
    /// | `OPENAI_API_KEY`          | none (required to serve)      |
    /// | `OPENAI_BASE_URL`         | `https://api.openai.com/v1`   |
    /// | `OPENAI_MODEL`            | `gpt-4o-mini`                 |
    /// | `GENERATION_TIMEOUT_SECS` | `60`                          |
    /// | `GENERATION_MAX_RETRIES`  | `2`                           |
    /// | `GENERATION_BACKOFF_MS`   | `500`                         |
    pub fn from_env() -> Self {
        Self {
            api_key: env_nonempty("OPENAI_API_KEY"),
            base_url: env_nonempty("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            model: env_nonempty("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            temperature: 0.1,
            timeout: Duration::from_secs(env_or("GENERATION_TIMEOUT_SECS", 60)),
            max_retries: env_or("GENERATION_MAX_RETRIES", 2),
            initial_backoff: Duration::from_millis(env_or("GENERATION_BACKOFF_MS", 500)),
        }
    }

    /// Model settings for one agent. Back-end output carries whole server
    /// files plus an API contract, so it gets the largest budget.
    pub fn model_for(&self, agent: AgentKind) -> ModelConfig {
        let max_tokens = match agent {
            AgentKind::Front => 1200,
            AgentKind::Back => 3600,
            AgentKind::Qa => 1200,
        };
        ModelConfig {
            model: self.model.clone(),
            max_tokens,
            temperature: self.temperature,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            temperature: 0.1,
            timeout: Duration::from_secs(60),
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
        }
    }
}
