//! OpenAI-compatible chat completions client.
//!
//! Sends one system + user message pair to `{base_url}/chat/completions` and
//! maps HTTP outcomes onto [`ServiceError`]. Retrying is the caller's job.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{CompletionRequest, GenerationClient, ServiceError};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_completion_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    endpoint: Url,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, url::ParseError> {
        let endpoint = Url::parse(&format!(
            "{}/chat/completions",
            base_url.trim_end_matches('/')
        ))?;
        Ok(Self {
            http: Client::new(),
            endpoint,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl GenerationClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let body = ChatRequest {
            model: &request.model.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_completion_tokens: request.model.max_tokens,
            temperature: request.model.temperature,
        };

        let resp = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout
                } else {
                    ServiceError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            // Provider text stays in the logs; callers only see the variant.
            warn!(status = status.as_u16(), body = %text, "generation request failed");
            return Err(classify_status(status.as_u16(), &text));
        }

        let data: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(format!("response parse error: {e}")))?;
        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::Malformed("no choices returned".into()))?;
        debug!(chars = content.len(), "generation completed");
        Ok(content.trim().to_string())
    }
}

/// Map a non-success HTTP status (and body) to a [`ServiceError`].
pub fn classify_status(status: u16, body: &str) -> ServiceError {
    match status {
        408 | 504 => ServiceError::Timeout,
        429 if body.contains("insufficient_quota") => ServiceError::QuotaExhausted,
        429 => ServiceError::RateLimited,
        401 | 403 => ServiceError::Unauthorized,
        s if s >= 500 => ServiceError::Unavailable { status: s },
        s => ServiceError::BadRequest(format!("status {s}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(408, ""), ServiceError::Timeout);
        assert_eq!(classify_status(504, ""), ServiceError::Timeout);
        assert_eq!(classify_status(429, "{}"), ServiceError::RateLimited);
        assert_eq!(
            classify_status(429, r#"{"error":{"code":"insufficient_quota"}}"#),
            ServiceError::QuotaExhausted
        );
        assert_eq!(classify_status(401, ""), ServiceError::Unauthorized);
        assert_eq!(
            classify_status(502, ""),
            ServiceError::Unavailable { status: 502 }
        );
        assert!(matches!(classify_status(400, ""), ServiceError::BadRequest(_)));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let client = OpenAiClient::new("https://api.openai.com/v1/", "k").unwrap();
        assert_eq!(
            client.endpoint.as_str(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert!(OpenAiClient::new("not a url", "k").is_err());
    }
}
