//! In-memory store for tests and database-less runs.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;

use super::{AttemptRepository, RunRepository, StoreError, UserRepository};
use crate::models::auth::{
    AttemptKind, AuthEvent, FailureWindow, User, UserId, UserWithPassword,
};
use crate::models::run::{AgentResult, RunDetail, RunId, RunRecord};
use crate::uuid::uuidv7;

/// Audit events kept before the oldest are dropped.
pub const MAX_AUDIT_EVENTS: usize = 10_000;

/// Seconds failed-login timestamps are kept. Matches the default lockout
/// window; use [`MemoryStore::with_retention`] when the window is longer.
pub const DEFAULT_FAILURE_RETENTION_SECS: i64 = 900;

/// Thread-safe in-memory implementation of every repository trait.
///
/// Cloning shares the underlying maps.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    users_by_email: DashMap<String, UserWithPassword>,
    /// Failure timestamps since the last successful login, per email.
    /// Emails without a retained failure have no entry.
    failures: DashMap<String, Vec<DateTime<Utc>>>,
    retention: Duration,
    audit: RwLock<VecDeque<AuthEvent>>,
    runs: DashMap<RunId, RunRecord>,
    agent_runs: DashMap<RunId, Vec<AgentResult>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_retention(Duration::seconds(DEFAULT_FAILURE_RETENTION_SECS))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that forgets failed logins older than `retention`.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                users_by_email: DashMap::new(),
                failures: DashMap::new(),
                retention,
                audit: RwLock::new(VecDeque::new()),
                runs: DashMap::new(),
                agent_runs: DashMap::new(),
            }),
        }
    }

    /// Snapshot of the authentication audit log, oldest first. Holds at most
    /// [`MAX_AUDIT_EVENTS`].
    pub async fn audit_events(&self) -> Vec<AuthEvent> {
        self.inner.audit.read().await.iter().cloned().collect()
    }

    /// Every persisted run, oldest first.
    pub fn all_runs(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self.inner.runs.iter().map(|r| r.value().clone()).collect();
        runs.sort_by_key(|r| (r.created_at, r.id));
        runs
    }

    /// Agent rows stored for a run.
    pub fn agent_runs(&self, run_id: RunId) -> Vec<AgentResult> {
        self.inner
            .agent_runs
            .get(&run_id)
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }
}

impl MemoryStore {
    /// Drop failure timestamps older than `cutoff`, and emails left with none.
    fn prune_failures(&self, cutoff: DateTime<Utc>) {
        self.inner.failures.retain(|_, at| {
            at.retain(|t| *t >= cutoff);
            !at.is_empty()
        });
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        match self.inner.users_by_email.entry(email.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!("email {email} exists"))),
            Entry::Vacant(slot) => {
                let user = User {
                    id: uuidv7(),
                    email: email.to_string(),
                    created_at: Utc::now(),
                };
                slot.insert(UserWithPassword {
                    user: user.clone(),
                    password_hash: password_hash.to_string(),
                });
                Ok(user)
            }
        }
    }

    async fn find_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserWithPassword>, StoreError> {
        Ok(self.inner.users_by_email.get(email).map(|u| u.value().clone()))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .users_by_email
            .iter()
            .find(|u| u.value().user.id == id)
            .map(|u| u.value().user.clone()))
    }
}

#[async_trait]
impl AttemptRepository for MemoryStore {
    async fn record_attempt(&self, event: &AuthEvent) -> Result<(), StoreError> {
        if event.kind == AttemptKind::Login {
            if event.success {
                self.inner.failures.remove(&event.email);
            } else {
                // The entry guard holds the shard lock, so concurrent updates
                // for the same email serialize here.
                self.inner
                    .failures
                    .entry(event.email.clone())
                    .or_default()
                    .push(event.at);
                self.prune_failures(event.at - self.inner.retention);
            }
        }
        let mut audit = self.inner.audit.write().await;
        if audit.len() == MAX_AUDIT_EVENTS {
            audit.pop_front();
        }
        audit.push_back(event.clone());
        Ok(())
    }

    async fn failure_window(
        &self,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<FailureWindow, StoreError> {
        let Some(failures) = self.inner.failures.get(email) else {
            return Ok(FailureWindow::default());
        };
        let recent: Vec<_> = failures.iter().filter(|at| **at >= since).copied().collect();
        Ok(FailureWindow {
            failures: u32::try_from(recent.len()).unwrap_or(u32::MAX),
            last_failure: recent.into_iter().max(),
        })
    }
}

#[async_trait]
impl RunRepository for MemoryStore {
    async fn save_run(&self, run: &RunRecord) -> Result<RunId, StoreError> {
        match self.inner.runs.entry(run.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!("run {} exists", run.id))),
            Entry::Vacant(slot) => {
                slot.insert(run.clone());
                Ok(run.id)
            }
        }
    }

    async fn save_run_with_agents(
        &self,
        run: &RunRecord,
        agents: &[AgentResult],
    ) -> Result<RunId, StoreError> {
        // Agent rows land before the run becomes visible, under the run's
        // entry lock.
        match self.inner.runs.entry(run.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!("run {} exists", run.id))),
            Entry::Vacant(slot) => {
                self.inner.agent_runs.insert(run.id, agents.to_vec());
                slot.insert(run.clone());
                Ok(run.id)
            }
        }
    }

    async fn save_agent_run(&self, run_id: RunId, result: &AgentResult) -> Result<(), StoreError> {
        if !self.inner.runs.contains_key(&run_id) {
            return Err(StoreError::NotFound(format!("run {run_id}")));
        }
        self.inner
            .agent_runs
            .entry(run_id)
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn list_runs(&self, user_id: UserId, limit: u32) -> Result<Vec<RunRecord>, StoreError> {
        let mut runs: Vec<RunRecord> = self
            .inner
            .runs
            .iter()
            .filter(|r| r.value().user_id == Some(user_id))
            .map(|r| r.value().clone())
            .collect();
        runs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn get_run(
        &self,
        run_id: RunId,
        user_id: UserId,
    ) -> Result<Option<RunDetail>, StoreError> {
        let Some(run) = self.inner.runs.get(&run_id).map(|r| r.value().clone()) else {
            return Ok(None);
        };
        if run.user_id != Some(user_id) {
            return Ok(None);
        }
        Ok(Some(RunDetail {
            agents: self.agent_runs(run_id),
            run,
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use std::time::Duration as StdDuration;

    use super::*;
    use crate::models::run::{AgentKind, RunStatus};

    fn run_for(owner: UserId) -> RunRecord {
        RunRecord {
            id: uuidv7(),
            task: "t".into(),
            language: "Python".into(),
            preset: None,
            status: RunStatus::Done,
            front_response: "f".into(),
            back_response: String::new(),
            qa_response: String::new(),
            error: None,
            user_id: Some(owner),
            created_at: Utc::now(),
        }
    }

    fn login(email: &str, success: bool, at: DateTime<Utc>) -> AuthEvent {
        AuthEvent {
            email: email.into(),
            kind: AttemptKind::Login,
            success,
            at,
        }
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = MemoryStore::new();
        store.create_user("a@example.com", "h").await.unwrap();
        let err = store.create_user("a@example.com", "h").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn success_resets_failure_window() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for i in 0..3 {
            store
                .record_attempt(&login("a@example.com", false, now + Duration::seconds(i)))
                .await
                .unwrap();
        }
        let window = store
            .failure_window("a@example.com", now - Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(window.failures, 3);
        assert_eq!(window.last_failure, Some(now + Duration::seconds(2)));

        store
            .record_attempt(&login("a@example.com", true, now + Duration::seconds(3)))
            .await
            .unwrap();
        let window = store
            .failure_window("a@example.com", now - Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(window, FailureWindow::default());
        assert_eq!(store.audit_events().await.len(), 4);
    }

    #[tokio::test]
    async fn failures_outside_window_are_ignored() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .record_attempt(&login("a@example.com", false, now - Duration::minutes(30)))
            .await
            .unwrap();
        store
            .record_attempt(&login("a@example.com", false, now))
            .await
            .unwrap();
        let window = store
            .failure_window("a@example.com", now - Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(window.failures, 1);
    }

    #[tokio::test]
    async fn concurrent_failures_are_all_counted() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_attempt(&login("a@example.com", false, now))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let window = store
            .failure_window("a@example.com", now - Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(window.failures, 20);
    }

    #[tokio::test]
    async fn runs_are_scoped_to_their_owner() {
        let store = MemoryStore::new();
        let owner = uuidv7();
        let run = run_for(owner);
        store.save_run(&run).await.unwrap();
        assert!(store.get_run(run.id, owner).await.unwrap().is_some());
        assert!(store.get_run(run.id, uuidv7()).await.unwrap().is_none());
        assert_eq!(store.list_runs(owner, 10).await.unwrap().len(), 1);
        assert!(store.list_runs(uuidv7(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_failures_are_pruned() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .record_attempt(&login("old@example.com", false, now - Duration::hours(1)))
            .await
            .unwrap();
        store
            .record_attempt(&login("new@example.com", false, now))
            .await
            .unwrap();
        assert!(!store.inner.failures.contains_key("old@example.com"));
        assert_eq!(store.inner.failures.len(), 1);

        store
            .record_attempt(&login("new@example.com", true, now))
            .await
            .unwrap();
        assert!(store.inner.failures.is_empty());
    }

    #[tokio::test]
    async fn audit_log_is_bounded() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for i in 0..MAX_AUDIT_EVENTS + 5 {
            let event = AuthEvent {
                email: format!("user{i}@example.com"),
                kind: AttemptKind::Register,
                success: true,
                at: now,
            };
            store.record_attempt(&event).await.unwrap();
        }
        let events = store.audit_events().await;
        assert_eq!(events.len(), MAX_AUDIT_EVENTS);
        assert_eq!(events[0].email, "user5@example.com");
    }

    #[tokio::test]
    async fn run_and_agents_are_saved_together() {
        let store = MemoryStore::new();
        let owner = uuidv7();
        let run = run_for(owner);
        let agents = vec![AgentResult {
            agent_type: AgentKind::Front,
            prompt: "p".into(),
            response: "f".into(),
            duration: StdDuration::from_millis(12),
            attempts: 1,
            valid: true,
        }];
        store.save_run_with_agents(&run, &agents).await.unwrap();
        let detail = store.get_run(run.id, owner).await.unwrap().unwrap();
        assert_eq!(detail.agents.len(), 1);
        assert_eq!(detail.agents[0].response, "f");

        let err = store.save_run_with_agents(&run, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.agent_runs(run.id).len(), 1);
    }
}
