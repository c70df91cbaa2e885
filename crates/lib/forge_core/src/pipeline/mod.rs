//! The front → back → QA generation pipeline.
//!
//! [`orchestrator::Orchestrator`] walks the fixed [`stage::PIPELINE`],
//! calling each requested agent through [`invoker::AgentInvoker`] and gating
//! its output with [`validator::ContractValidator`] before a later stage may
//! consume it. Every run, full or partial, is persisted.

pub mod invoker;
pub mod orchestrator;
pub mod prompts;
pub mod stage;
pub mod validator;

pub use invoker::{AgentInvoker, RetryPolicy, UpstreamError};
pub use orchestrator::{Orchestrator, PipelineError, PipelineState, RunOutcome};
pub use prompts::{DefaultPrompts, Prompt, PromptBuilder, StageInput};
pub use stage::{PIPELINE, Stage};
pub use validator::{ContractValidator, ValidationContext, Verdict};
