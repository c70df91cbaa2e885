//! Authentication configuration.

use chrono::Duration;

use super::token::{DEFAULT_TOKEN_MAX_AGE_SECS, resolve_token_secret};
use crate::env::env_or;

/// Default Argon2 memory cost (KiB), the OWASP baseline for Argon2id.
pub const DEFAULT_ARGON2_MEMORY_KIB: u32 = 19 * 1024;

/// Default Argon2 iteration count.
pub const DEFAULT_ARGON2_ITERATIONS: u32 = 2;

/// Settings for credential hashing, lockout and session tokens.
#[derive(Clone)]
pub struct AuthConfig {
    /// Token signing secret.
    pub token_secret: String,
    /// Server-side pepper mixed into every password hash.
    pub password_pepper: String,
    /// Session token lifetime.
    pub token_max_age: Duration,
    /// Failed logins that trigger lockout.
    pub lockout_threshold: u32,
    /// Rolling window failed logins are counted in.
    pub lockout_window: Duration,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_max_age", &self.token_max_age)
            .field("lockout_threshold", &self.lockout_threshold)
            .field("lockout_window", &self.lockout_window)
            .field("argon2_memory_kib", &self.argon2_memory_kib)
            .field("argon2_iterations", &self.argon2_iterations)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable              | Default                         |
    /// |-----------------------|---------------------------------|
    /// | `JWT_SECRET` / `SECRET_KEY` | generated & persisted to file |
    /// | `PASSWORD_PEPPER`     | empty                           |
    /// | `TOKEN_MAX_AGE`       | `604800` (7 days, seconds)      |
    /// | `LOCKOUT_THRESHOLD`   | `5`                             |
    /// | `LOCKOUT_WINDOW_SECS` | `900`                           |
    /// | `ARGON2_MEMORY_KIB`   | `19456`                         |
    /// | `ARGON2_ITERATIONS`   | `2`                             |
    pub fn from_env() -> Self {
        Self {
            token_secret: resolve_token_secret(),
            password_pepper: std::env::var("PASSWORD_PEPPER").unwrap_or_default(),
            token_max_age: Duration::seconds(env_or("TOKEN_MAX_AGE", DEFAULT_TOKEN_MAX_AGE_SECS)),
            lockout_threshold: env_or("LOCKOUT_THRESHOLD", 5),
            lockout_window: Duration::seconds(env_or("LOCKOUT_WINDOW_SECS", 900)),
            argon2_memory_kib: env_or("ARGON2_MEMORY_KIB", DEFAULT_ARGON2_MEMORY_KIB),
            argon2_iterations: env_or("ARGON2_ITERATIONS", DEFAULT_ARGON2_ITERATIONS),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            password_pepper: String::new(),
            token_max_age: Duration::seconds(DEFAULT_TOKEN_MAX_AGE_SECS),
            lockout_threshold: 5,
            lockout_window: Duration::minutes(15),
            argon2_memory_kib: DEFAULT_ARGON2_MEMORY_KIB,
            argon2_iterations: DEFAULT_ARGON2_ITERATIONS,
        }
    }
}
