//! Generation run models: agents, requests, per-stage results, run records.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::UserId;

/// Run identifier.
pub type RunId = Uuid;

/// Language used when a request does not name one.
pub const DEFAULT_LANGUAGE: &str = "Python";

/// One generation stage. Declaration order is pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Front,
    Back,
    Qa,
}

impl AgentKind {
    /// All agents in pipeline order.
    pub const ALL: [AgentKind; 3] = [AgentKind::Front, AgentKind::Back, AgentKind::Qa];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Front => "front",
            AgentKind::Back => "back",
            AgentKind::Qa => "qa",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(AgentKind::Front),
            "back" => Ok(AgentKind::Back),
            "qa" => Ok(AgentKind::Qa),
            other => Err(format!("unknown agent '{other}'")),
        }
    }
}

/// Ordered, duplicate-free subset of agents. Iterates in pipeline order
/// regardless of the order the caller listed them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSet(BTreeSet<AgentKind>);

impl AgentSet {
    /// Every agent.
    pub fn all() -> Self {
        Self(AgentKind::ALL.into_iter().collect())
    }

    /// Parse agent names. Rejects unknown names and an empty list.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, String> {
        let set = names
            .iter()
            .map(|n| n.as_ref().parse::<AgentKind>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        if set.is_empty() {
            return Err("at least one agent must be requested".into());
        }
        Ok(Self(set))
    }

    pub fn contains(&self, agent: AgentKind) -> bool {
        self.0.contains(&agent)
    }

    pub fn iter(&self) -> impl Iterator<Item = AgentKind> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for AgentSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<AgentKind> for AgentSet {
    fn from_iter<I: IntoIterator<Item = AgentKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A validated request for one pipeline run. Exists only for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub task: String,
    pub language: String,
    pub agents: AgentSet,
    pub preset: Option<String>,
    pub user_id: Option<UserId>,
}

impl GenerationRequest {
    /// Request for all agents with the default language.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            language: DEFAULT_LANGUAGE.to_string(),
            agents: AgentSet::all(),
            preset: None,
            user_id: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_agents(mut self, agents: AgentSet) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_preset(mut self, preset: Option<String>) -> Self {
        self.preset = preset;
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Output of one agent stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_type: AgentKind,
    pub prompt: String,
    pub response: String,
    /// Wall-clock time across every attempt, including backoff sleeps.
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    pub attempts: u32,
    pub valid: bool,
}

/// Outcome of a run as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    ContractViolation,
    UpstreamError,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Done => "done",
            RunStatus::ContractViolation => "contract_violation",
            RunStatus::UpstreamError => "upstream_error",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "done" => Ok(RunStatus::Done),
            "contract_violation" => Ok(RunStatus::ContractViolation),
            "upstream_error" => Ok(RunStatus::UpstreamError),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// The stage a run stopped at and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: AgentKind,
    pub reason: String,
}

/// Persisted record of one full or partial run. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub task: String,
    pub language: String,
    pub preset: Option<String>,
    pub status: RunStatus,
    pub front_response: String,
    pub back_response: String,
    pub qa_response: String,
    pub error: Option<StageFailure>,
    pub user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    /// Accepted response for a stage, empty when the stage did not run or
    /// failed.
    pub fn response(&self, agent: AgentKind) -> &str {
        match agent {
            AgentKind::Front => &self.front_response,
            AgentKind::Back => &self.back_response,
            AgentKind::Qa => &self.qa_response,
        }
    }
}

/// A run with its per-agent rows, as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: RunRecord,
    pub agents: Vec<AgentResult>,
}

/// Serde helper storing a `Duration` as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
