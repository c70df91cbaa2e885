//! Domain models shared by the auth, pipeline and store modules.

pub mod auth;
pub mod run;
