//! Shared harness: router over an in-memory store and a scripted generation
//! client, so no database or network is needed.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use forge_api::AppState;
use forge_api::config::ApiConfig;
use forge_core::auth::AuthConfig;
use forge_core::generation::{CompletionRequest, GenerationClient, GenerationConfig, ServiceError};
use forge_core::store::MemoryStore;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::ServiceExt;

pub const FRONT: &str = "```html\n<!-- index.html -->\n<form id=\"todo-form\"><input name=\"title\"></form>\n```\n```javascript\n// script.js\nasync function addTodo() { await fetch('/api/todos', { method: 'POST' }); }\n```";
pub const BACK: &str = "```python\nfrom flask import Flask\napp = Flask(__name__)\n\n@app.route('/api/todos', methods=['POST'])\ndef create_todo():\n    return {'ok': True}, 201\n```";
pub const QA: &str = "Test case 1: submit todo-form.\nExpected result: POST /api/todos returns 201.\n```python\ndef test_create_todo(client):\n    assert client.post('/api/todos').status_code == 201\n```";

/// Generation client that replays a fixed script and records every request.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Result<String, ServiceError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub async fn push(&self, reply: Result<&str, ServiceError>) {
        self.replies.lock().await.push_back(reply.map(String::from));
    }

    pub async fn calls(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        self.requests.lock().await.push(request.clone());
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Malformed("script exhausted".into())))
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
    pub client: Arc<ScriptedClient>,
}

pub fn test_config() -> ApiConfig {
    ApiConfig {
        bind_addr: "127.0.0.1:0".into(),
        database_url: String::new(),
        auth: AuthConfig {
            token_secret: "test-secret".into(),
            password_pepper: "test-pepper".into(),
            argon2_memory_kib: 64,
            argon2_iterations: 1,
            ..AuthConfig::default()
        },
        generation: GenerationConfig {
            timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(1),
            ..GenerationConfig::default()
        },
    }
}

impl TestApp {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let client = Arc::new(ScriptedClient::default());
        let state = AppState::new(test_config(), Arc::new(store.clone()), client.clone())
            .expect("app state");
        Self {
            router: forge_api::router(state),
            store,
            client,
        }
    }

    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .expect("request");
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, json)
    }

    /// Register an account and return `(id, token)`.
    pub async fn register(&self, email: &str, password: &str) -> (String, String) {
        let (status, _, json) = self
            .send(
                "POST",
                "/auth/register",
                None,
                Some(serde_json::json!({"email": email, "password": password})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {json}");
        (
            json["id"].as_str().unwrap().to_string(),
            json["token"].as_str().unwrap().to_string(),
        )
    }
}
