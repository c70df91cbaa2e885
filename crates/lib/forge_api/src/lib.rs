//! # forge_api
//!
//! HTTP API library for Forge.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::Router;
use axum::http::{Method, header};
use axum::routing::{get, post};
use forge_core::auth::{AuthError, CredentialStore, TokenService};
use forge_core::generation::GenerationClient;
use forge_core::pipeline::{DefaultPrompts, Orchestrator};
use forge_core::store::{AttemptRepository, RunRepository, UserRepository};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::handlers::{auth, generate, health, history};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// API configuration.
    pub config: ApiConfig,
    pub credentials: Arc<CredentialStore>,
    pub tokens: Arc<TokenService>,
    pub orchestrator: Arc<Orchestrator>,
    pub runs: Arc<dyn RunRepository>,
}

impl AppState {
    /// Wire the services over one backing store and a generation client.
    pub fn new<S>(
        config: ApiConfig,
        store: Arc<S>,
        client: Arc<dyn GenerationClient>,
    ) -> Result<Self, AuthError>
    where
        S: UserRepository + AttemptRepository + RunRepository + 'static,
    {
        let credentials = CredentialStore::from_config(store.clone(), &config.auth)?;
        let tokens = TokenService::new(
            config.auth.token_secret.as_bytes(),
            config.auth.token_max_age,
        );
        let orchestrator = Orchestrator::new(
            client,
            Arc::new(DefaultPrompts),
            store.clone(),
            config.generation.clone(),
        );
        Ok(Self {
            config,
            credentials: Arc::new(credentials),
            tokens: Arc::new(tokens),
            orchestrator: Arc::new(orchestrator),
            runs: store,
        })
    }
}

/// Run embedded database migrations.
///
/// Delegates to `forge_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    forge_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Public routes (no auth required)
    let public = Router::new()
        .route("/health", get(health::health_handler))
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler));

    // Protected routes (require auth)
    let protected = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/generate", post(generate::generate_handler))
        .route("/history", get(history::list_runs_handler))
        .route("/history/{id}", get(history::get_run_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .with_state(state)
}
