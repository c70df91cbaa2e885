//! Password hashing via Argon2id, keyed with a server-side pepper.
//!
//! The pepper is passed to Argon2 as its secret input, so it influences the
//! hash but is never encoded in the PHC string stored next to the user.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier, Version};

use super::AuthError;

/// Argon2id hasher with a fixed cost and pepper.
#[derive(Clone)]
pub struct PasswordHasher {
    pepper: Vec<u8>,
    params: Params,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher")
            .field("pepper", &"<redacted>")
            .field("params", &self.params)
            .finish()
    }
}

impl PasswordHasher {
    /// Build a hasher. `memory_kib` and `iterations` are the Argon2 m/t costs.
    pub fn new(pepper: &[u8], memory_kib: u32, iterations: u32) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| AuthError::Internal(format!("argon2 params: {e}")))?;
        Ok(Self {
            pepper: pepper.to_vec(),
            params,
        })
    }

    fn argon2(&self) -> Result<Argon2<'_>, AuthError> {
        if self.pepper.is_empty() {
            return Ok(Argon2::new(
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            ));
        }
        Argon2::new_with_secret(
            &self.pepper,
            Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
        .map_err(|e| AuthError::Internal(format!("argon2 init: {e}")))
    }

    /// Hash a password with a fresh random salt. Returns a PHC string.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::Internal(format!("argon2 hash: {e}")))
    }

    /// Verify a password against a PHC string produced by [`Self::hash`].
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AuthError::Internal(format!("argon2 parse: {e}")))?;
        match self.argon2()?.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Internal(format!("argon2 verify: {e}"))),
        }
    }
}
