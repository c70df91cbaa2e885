//! API server configuration.

use forge_core::auth::AuthConfig;
use forge_core::generation::GenerationConfig;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:5000").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    pub auth: AuthConfig,
    pub generation: GenerationConfig,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable       | Default                            |
    /// |----------------|------------------------------------|
    /// | `BIND_ADDR`    | `127.0.0.1:5000`                   |
    /// | `DATABASE_URL` | `postgres://localhost:5432/forge`  |
    ///
    /// Authentication and generation settings are read by
    /// [`AuthConfig::from_env`] and [`GenerationConfig::from_env`].
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.into()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/forge".into()),
            auth: AuthConfig::from_env(),
            generation: GenerationConfig::from_env(),
        }
    }
}
