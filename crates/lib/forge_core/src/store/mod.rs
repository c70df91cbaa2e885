//! Persistence seam.
//!
//! The credential store, lockout accounting and the orchestrator talk to
//! storage only through these traits. [`postgres::PgStore`] is the production
//! implementation; [`memory::MemoryStore`] backs tests and database-less runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::auth::{AuthEvent, FailureWindow, User, UserId, UserWithPassword};
use crate::models::run::{AgentResult, RunDetail, RunId, RunRecord};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// User accounts. Emails arrive already normalized.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user. Fails with [`StoreError::Conflict`] if the email exists.
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, StoreError>;

    async fn find_user_by_email(&self, email: &str)
    -> Result<Option<UserWithPassword>, StoreError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;
}

/// Authentication audit log and lockout counters.
///
/// Implementations must not lose updates when several attempts for the same
/// email are recorded concurrently.
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Append an audit event. A failed `login` increments the email's failure
    /// count; a successful one resets it.
    async fn record_attempt(&self, event: &AuthEvent) -> Result<(), StoreError>;

    /// Failed logins recorded at or after `since` and after the most recent
    /// successful login.
    async fn failure_window(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<FailureWindow, StoreError>;
}

/// Generation run history.
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn save_run(&self, run: &RunRecord) -> Result<RunId, StoreError>;

    async fn save_agent_run(&self, run_id: RunId, result: &AgentResult) -> Result<(), StoreError>;

    /// Save a run and its agent rows as one unit: either all rows are stored
    /// or none are.
    async fn save_run_with_agents(
        &self,
        run: &RunRecord,
        agents: &[AgentResult],
    ) -> Result<RunId, StoreError>;

    /// Most recent runs for a user, newest first.
    async fn list_runs(&self, user_id: UserId, limit: u32) -> Result<Vec<RunRecord>, StoreError>;

    /// One run with its agent rows, only if owned by `user_id`.
    async fn get_run(&self, run_id: RunId, user_id: UserId)
    -> Result<Option<RunDetail>, StoreError>;
}
