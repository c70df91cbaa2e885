//! # forge_core
//!
//! Core domain logic for Forge: credential and token handling, the
//! front → back → QA generation pipeline, and persistence.

pub mod auth;
mod env;
pub mod generation;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
