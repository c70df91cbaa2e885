//! PostgreSQL store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{AttemptRepository, RunRepository, StoreError, UserRepository};
use crate::models::auth::{AuthEvent, FailureWindow, User, UserId, UserWithPassword};
use crate::models::run::{AgentKind, AgentResult, RunDetail, RunId, RunRecord, StageFailure};
use crate::uuid::uuidv7;

/// Repository implementation over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: RunId,
    task: String,
    language: String,
    preset: Option<String>,
    status: String,
    front_response: String,
    back_response: String,
    qa_response: String,
    error_stage: Option<String>,
    error_reason: Option<String>,
    user_id: Option<UserId>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for RunRecord {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(StoreError::Corrupt)?;
        let error = match (row.error_stage, row.error_reason) {
            (Some(stage), reason) => Some(StageFailure {
                stage: stage.parse().map_err(StoreError::Corrupt)?,
                reason: reason.unwrap_or_default(),
            }),
            (None, _) => None,
        };
        Ok(RunRecord {
            id: row.id,
            task: row.task,
            language: row.language,
            preset: row.preset,
            status,
            front_response: row.front_response,
            back_response: row.back_response,
            qa_response: row.qa_response,
            error,
            user_id: row.user_id,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AgentRunRow {
    agent_type: String,
    prompt: String,
    response: String,
    duration_ms: i64,
    attempts: i32,
    valid: bool,
}

impl TryFrom<AgentRunRow> for AgentResult {
    type Error = StoreError;

    fn try_from(row: AgentRunRow) -> Result<Self, Self::Error> {
        Ok(AgentResult {
            agent_type: row.agent_type.parse::<AgentKind>().map_err(StoreError::Corrupt)?,
            prompt: row.prompt,
            response: row.response,
            duration: Duration::from_millis(u64::try_from(row.duration_ms).unwrap_or_default()),
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            valid: row.valid,
        })
    }
}

const RUN_COLUMNS: &str = "id, task, language, preset, status, front_response, back_response, \
     qa_response, error_stage, error_reason, user_id, created_at";

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, (UserId, String, DateTime<Utc>)>(
            "INSERT INTO users (email, password_hash) VALUES ($1, $2) \
             RETURNING id, email, created_at",
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("email {email} exists"))
            }
            other => StoreError::Db(other),
        })?;
        Ok(User {
            id: row.0,
            email: row.1,
            created_at: row.2,
        })
    }

    async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserWithPassword>, StoreError> {
        let row = sqlx::query_as::<_, (UserId, String, String, DateTime<Utc>)>(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, email, password_hash, created_at)| UserWithPassword {
            user: User {
                id,
                email,
                created_at,
            },
            password_hash,
        }))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, (UserId, String, DateTime<Utc>)>(
            "SELECT id, email, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, email, created_at)| User {
            id,
            email,
            created_at,
        }))
    }
}

#[async_trait]
impl AttemptRepository for PgStore {
    async fn record_attempt(&self, event: &AuthEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO auth_attempts (id, email, kind, success, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(uuidv7())
        .bind(&event.email)
        .bind(event.kind.as_str())
        .bind(event.success)
        .bind(event.at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn failure_window(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<FailureWindow, StoreError> {
        // Append-only log: the count is derived, so concurrent inserts
        // cannot lose an increment.
        let (failures, last_failure) = sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(
            "SELECT COUNT(*), MAX(created_at) FROM auth_attempts \
             WHERE email = $1 AND kind = 'login' AND success = false \
               AND created_at >= $2 \
               AND created_at > COALESCE( \
                   (SELECT MAX(created_at) FROM auth_attempts \
                    WHERE email = $1 AND kind = 'login' AND success = true), \
                   '-infinity'::timestamptz)",
        )
        .bind(email)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(FailureWindow {
            failures: u32::try_from(failures).unwrap_or(u32::MAX),
            last_failure,
        })
    }
}

async fn insert_run<'e, E>(executor: E, run: &RunRecord) -> Result<(), StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO runs (id, task, language, preset, status, front_response, \
         back_response, qa_response, error_stage, error_reason, user_id, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(run.id)
    .bind(&run.task)
    .bind(&run.language)
    .bind(&run.preset)
    .bind(run.status.as_str())
    .bind(&run.front_response)
    .bind(&run.back_response)
    .bind(&run.qa_response)
    .bind(run.error.as_ref().map(|e| e.stage.as_str()))
    .bind(run.error.as_ref().map(|e| e.reason.as_str()))
    .bind(run.user_id)
    .bind(run.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_agent_run<'e, E>(
    executor: E,
    run_id: RunId,
    result: &AgentResult,
) -> Result<(), StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO agent_runs (id, run_id, agent_type, prompt, response, duration_ms, \
         attempts, valid) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(uuidv7())
    .bind(run_id)
    .bind(result.agent_type.as_str())
    .bind(&result.prompt)
    .bind(&result.response)
    .bind(i64::try_from(result.duration.as_millis()).unwrap_or(i64::MAX))
    .bind(i32::try_from(result.attempts).unwrap_or(i32::MAX))
    .bind(result.valid)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl RunRepository for PgStore {
    async fn save_run(&self, run: &RunRecord) -> Result<RunId, StoreError> {
        insert_run(&self.pool, run).await?;
        Ok(run.id)
    }

    async fn save_agent_run(&self, run_id: RunId, result: &AgentResult) -> Result<(), StoreError> {
        insert_agent_run(&self.pool, run_id, result).await
    }

    async fn save_run_with_agents(
        &self,
        run: &RunRecord,
        agents: &[AgentResult],
    ) -> Result<RunId, StoreError> {
        let mut tx = self.pool.begin().await?;
        insert_run(&mut *tx, run).await?;
        for result in agents {
            insert_agent_run(&mut *tx, run.id, result).await?;
        }
        tx.commit().await?;
        Ok(run.id)
    }

    async fn list_runs(&self, user_id: UserId, limit: u32) -> Result<Vec<RunRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RunRecord::try_from).collect()
    }

    async fn get_run(
        &self,
        run_id: RunId,
        user_id: UserId,
    ) -> Result<Option<RunDetail>, StoreError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE id = $1 AND user_id = $2"
        ))
        .bind(run_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let agents = sqlx::query_as::<_, AgentRunRow>(
            "SELECT agent_type, prompt, response, duration_ms, attempts, valid \
             FROM agent_runs WHERE run_id = $1 ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(AgentResult::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(RunDetail {
            run: RunRecord::try_from(row)?,
            agents,
        }))
    }
}
