//! Request and response bodies.

use chrono::{DateTime, Utc};
use forge_core::models::auth::{User, UserId};
use forge_core::models::run::{
    AgentKind, AgentResult, AgentSet, GenerationRequest, RunId, RunRecord, RunStatus,
    StageFailure,
};
use forge_core::pipeline::RunOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// `POST /auth/register` and `POST /auth/login` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Successful register or login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub id: UserId,
    pub email: String,
    pub token: String,
}

/// `GET /auth/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            created_at: u.created_at,
        }
    }
}

/// `POST /generate` body. Every field is optional at the JSON level so that
/// a missing `task` surfaces as a 400 with the standard error body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub language: Option<String>,
    /// A list of agent names. Anything that is not a list selects every
    /// agent.
    #[serde(default)]
    pub agents: Option<Value>,
    #[serde(default)]
    pub preset: Option<String>,
}

impl GenerateRequest {
    /// Validate the agent selection and build the pipeline request.
    pub fn into_generation(self, user_id: UserId) -> Result<GenerationRequest, String> {
        let agents = match self.agents {
            Some(Value::Array(items)) => {
                let names = items
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .ok_or_else(|| format!("agent names must be strings, got {v}"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                AgentSet::from_names(&names)?
            }
            _ => AgentSet::all(),
        };
        let mut request = GenerationRequest::new(self.task)
            .with_agents(agents)
            .with_preset(self.preset.filter(|p| !p.trim().is_empty()))
            .with_user(user_id);
        if let Some(language) = self.language.filter(|l| !l.trim().is_empty()) {
            request = request.with_language(language.trim());
        }
        Ok(request)
    }
}

/// Per-agent entry of a generation bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_type: AgentKind,
    pub duration_ms: u64,
    pub attempts: u32,
    pub valid: bool,
}

impl From<&AgentResult> for AgentSummary {
    fn from(r: &AgentResult) -> Self {
        Self {
            agent_type: r.agent_type,
            duration_ms: u64::try_from(r.duration.as_millis()).unwrap_or(u64::MAX),
            attempts: r.attempts,
            valid: r.valid,
        }
    }
}

/// `POST /generate` response bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub run_id: RunId,
    pub task: String,
    pub language: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa: Option<String>,
    pub agents: Vec<AgentSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailure>,
}

impl From<RunOutcome> for GenerateResponse {
    fn from(o: RunOutcome) -> Self {
        let take = |agent: AgentKind| o.response(agent).map(str::to_string);
        Self {
            front: take(AgentKind::Front),
            back: take(AgentKind::Back),
            qa: take(AgentKind::Qa),
            agents: o.results.iter().map(AgentSummary::from).collect(),
            run_id: o.run_id,
            task: o.task,
            language: o.language,
            status: o.status,
            error: o.error,
        }
    }
}

/// `GET /history` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

/// One row of `GET /history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub task: String,
    pub language: String,
    pub preset: Option<String>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageFailure>,
    pub created_at: DateTime<Utc>,
}

impl From<RunRecord> for RunSummary {
    fn from(r: RunRecord) -> Self {
        Self {
            id: r.id,
            task: r.task,
            language: r.language,
            preset: r.preset,
            status: r.status,
            error: r.error,
            created_at: r.created_at,
        }
    }
}

/// `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use forge_core::models::run::DEFAULT_LANGUAGE;
    use serde_json::json;

    use super::*;

    fn parse(body: Value) -> Result<GenerationRequest, String> {
        let req: GenerateRequest = serde_json::from_value(body).unwrap();
        req.into_generation(forge_core::uuid::uuidv7())
    }

    #[test]
    fn non_list_agents_select_all() {
        for agents in [json!("front"), json!({"front": true}), json!(null), json!(3)] {
            let req = parse(json!({"task": "x", "agents": agents})).unwrap();
            assert_eq!(req.agents, AgentSet::all());
        }
        let req = parse(json!({"task": "x"})).unwrap();
        assert_eq!(req.agents, AgentSet::all());
    }

    #[test]
    fn listed_agents_are_validated() {
        let req = parse(json!({"task": "x", "agents": ["qa", "front"]})).unwrap();
        assert_eq!(req.agents.iter().collect::<Vec<_>>(), vec![AgentKind::Front, AgentKind::Qa]);
        assert!(parse(json!({"task": "x", "agents": []})).is_err());
        assert!(parse(json!({"task": "x", "agents": ["design"]})).is_err());
        assert!(parse(json!({"task": "x", "agents": [1]})).is_err());
    }

    #[test]
    fn blank_language_falls_back() {
        let req = parse(json!({"task": "x", "language": "  "})).unwrap();
        assert_eq!(req.language, DEFAULT_LANGUAGE);
        let req = parse(json!({"task": "x", "language": "Java"})).unwrap();
        assert_eq!(req.language, "Java");
    }
}
