//! Credential store: registration, password verification and lockout.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{AuthConfig, AuthError, PasswordHasher};
use crate::models::auth::{AttemptKind, AuthEvent, User, UserId};
use crate::store::{AttemptRepository, UserRepository};

/// Minimum password length, in characters.
pub const MIN_PASSWORD_CHARS: usize = 6;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("email regex is valid")
});

/// How many failed logins inside which window lock an email out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub window: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::minutes(15),
        }
    }
}

/// Owns user accounts and the lockout counters that guard them.
pub struct CredentialStore {
    users: Arc<dyn UserRepository>,
    attempts: Arc<dyn AttemptRepository>,
    hasher: PasswordHasher,
    lockout: LockoutPolicy,
    /// Hash verified against when the email is unknown, so both failure
    /// paths cost one Argon2 evaluation.
    dummy_hash: String,
    /// One guard per email with a login in flight. The lockout check, the
    /// password comparison and the audit record run under it, so parallel
    /// guesses cannot all read a counter that is still below the threshold.
    /// Serializes logins within this process only.
    email_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CredentialStore {
    pub fn new(
        users: Arc<dyn UserRepository>,
        attempts: Arc<dyn AttemptRepository>,
        hasher: PasswordHasher,
        lockout: LockoutPolicy,
    ) -> Result<Self, AuthError> {
        let filler: String = rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let dummy_hash = hasher.hash(&filler)?;
        Ok(Self {
            users,
            attempts,
            hasher,
            lockout,
            dummy_hash,
            email_locks: DashMap::new(),
        })
    }

    /// Build from [`AuthConfig`] with a single backing store for users and
    /// attempts.
    pub fn from_config<S>(store: Arc<S>, config: &AuthConfig) -> Result<Self, AuthError>
    where
        S: UserRepository + AttemptRepository + 'static,
    {
        let hasher = PasswordHasher::new(
            config.password_pepper.as_bytes(),
            config.argon2_memory_kib,
            config.argon2_iterations,
        )?;
        Self::new(
            store.clone(),
            store,
            hasher,
            LockoutPolicy {
                threshold: config.lockout_threshold,
                window: config.lockout_window,
            },
        )
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        self.lockout
    }

    /// Create an account.
    pub async fn register(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        self.register_at(email, password, Utc::now()).await
    }

    pub async fn register_at(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<UserId, AuthError> {
        let email = normalize_email(email);
        let result = self.try_register(&email, password).await;
        self.audit(&email, AttemptKind::Register, result.is_ok(), now)
            .await?;
        match &result {
            Ok(id) => info!(user_id = %id, "user registered"),
            Err(e) => info!(reason = %e, "registration rejected"),
        }
        result
    }

    async fn try_register(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        if !EMAIL_RE.is_match(email) {
            return Err(AuthError::Validation("Invalid email address".into()));
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AuthError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        if self.users.find_user_by_email(email).await?.is_some() {
            return Err(AuthError::Conflict(email.to_string()));
        }
        let hash = self.hash_blocking(password).await?;
        // A concurrent registration can still win the race; the store's
        // unique constraint surfaces it as a conflict.
        let user = self.users.create_user(email, &hash).await?;
        Ok(user.id)
    }

    /// Check a password, applying lockout before the comparison.
    pub async fn verify(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        self.verify_at(email, password, Utc::now()).await
    }

    pub async fn verify_at(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<UserId, AuthError> {
        let email = normalize_email(email);
        let lock = self.email_locks.entry(email.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.verify_serialized(&email, password, now).await
        };
        drop(lock);
        self.email_locks.remove_if(&email, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn verify_serialized(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<UserId, AuthError> {
        let window = self
            .attempts
            .failure_window(email, now - self.lockout.window)
            .await?;
        if window.failures >= self.lockout.threshold {
            let unlock_at = window.last_failure.unwrap_or(now) + self.lockout.window;
            let retry_after_secs = u64::try_from((unlock_at - now).num_seconds().max(1))
                .unwrap_or(1);
            self.audit(email, AttemptKind::LoginLocked, false, now)
                .await?;
            warn!(failures = window.failures, retry_after_secs, "login rejected: locked out");
            return Err(AuthError::LockedOut { retry_after_secs });
        }

        let user = self.users.find_user_by_email(email).await?;
        let (user_id, hash) = match user {
            Some(u) => (Some(u.user.id), u.password_hash),
            None => (None, self.dummy_hash.clone()),
        };
        let matches = self.verify_blocking(password, hash).await?;

        match user_id {
            Some(id) if matches => {
                self.audit(email, AttemptKind::Login, true, now).await?;
                info!(user_id = %id, "login succeeded");
                Ok(id)
            }
            _ => {
                self.audit(email, AttemptKind::Login, false, now).await?;
                info!(failures = window.failures + 1, "login failed");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// Look up a user by id.
    pub async fn user(&self, id: UserId) -> Result<Option<User>, AuthError> {
        Ok(self.users.get_user(id).await?)
    }

    async fn audit(
        &self,
        email: &str,
        kind: AttemptKind,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let event = AuthEvent {
            email: email.to_string(),
            kind,
            success,
            at,
        };
        Ok(self.attempts.record_attempt(&event).await?)
    }

    async fn hash_blocking(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
    }

    async fn verify_blocking(&self, password: &str, hash: String) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("verify task: {e}")))?
    }
}

/// Trim and lowercase an email for storage and comparison.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
