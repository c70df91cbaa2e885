//! Authentication: password hashing, lockout-aware credential checks and
//! stateless session tokens.
//!
//! Shared by `forge_api` (HTTP boundary) and anything else that needs to
//! gate the generation pipeline.

pub mod config;
pub mod credentials;
pub mod password;
pub mod token;

use thiserror::Error;

use crate::store::StoreError;

pub use config::AuthConfig;
pub use credentials::{CredentialStore, LockoutPolicy};
pub use password::PasswordHasher;
pub use token::TokenService;

/// Authentication errors.
///
/// The `Display` text of the credential and token variants is safe to show
/// to clients; it never distinguishes an unknown email from a wrong password.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Email already registered")]
    Conflict(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Too many failed attempts, retry in {retry_after_secs}s")]
    LockedOut { retry_after_secs: u64 },

    #[error("Invalid or expired token")]
    ExpiredToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => AuthError::Conflict(msg),
            other => AuthError::Store(other),
        }
    }
}
