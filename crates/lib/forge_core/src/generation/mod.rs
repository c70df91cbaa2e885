//! External text-generation service.
//!
//! The pipeline only sees [`GenerationClient`]; [`openai::OpenAiClient`] is
//! the production implementation. Every failure is a [`ServiceError`] that
//! knows whether retrying it can help.

pub mod config;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::GenerationConfig;
pub use openai::OpenAiClient;

/// Model settings for one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A single system + user completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: ModelConfig,
}

/// Failures of the generation service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("service unavailable (status {status})")]
    Unavailable { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request rejected: {0}")]
    BadRequest(String),

    #[error("authentication with the generation service failed")]
    Unauthorized,

    #[error("quota exhausted")]
    QuotaExhausted,

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// Whether the same request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Timeout
                | ServiceError::RateLimited
                | ServiceError::Unavailable { .. }
                | ServiceError::Transport(_)
        )
    }
}

/// The `complete(prompt, modelConfig)` call of the generation service.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ServiceError::Timeout.is_transient());
        assert!(ServiceError::RateLimited.is_transient());
        assert!(ServiceError::Unavailable { status: 503 }.is_transient());
        assert!(ServiceError::Transport("reset".into()).is_transient());
        assert!(!ServiceError::BadRequest("bad".into()).is_transient());
        assert!(!ServiceError::Unauthorized.is_transient());
        assert!(!ServiceError::QuotaExhausted.is_transient());
        assert!(!ServiceError::Malformed("x".into()).is_transient());
    }
}
