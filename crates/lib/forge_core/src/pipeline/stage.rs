//! Pipeline stages and their input dependencies.

use crate::models::run::AgentKind;

/// One pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub agent: AgentKind,
    /// Stages whose accepted output this stage's prompt and contract use.
    /// A dependency that was not requested is skipped, not waited for.
    pub depends_on: &'static [AgentKind],
}

/// Stages in execution order.
pub const PIPELINE: [Stage; 3] = [
    Stage {
        agent: AgentKind::Front,
        depends_on: &[],
    },
    Stage {
        agent: AgentKind::Back,
        depends_on: &[],
    },
    Stage {
        agent: AgentKind::Qa,
        depends_on: &[AgentKind::Front, AgentKind::Back],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_precede_dependents() {
        for (i, stage) in PIPELINE.iter().enumerate() {
            for dep in stage.depends_on {
                let pos = PIPELINE.iter().position(|s| s.agent == *dep).unwrap();
                assert!(pos < i, "{} depends on later stage {dep}", stage.agent);
            }
        }
    }

    #[test]
    fn pipeline_order_matches_agent_order() {
        let agents: Vec<_> = PIPELINE.iter().map(|s| s.agent).collect();
        assert_eq!(agents, AgentKind::ALL.to_vec());
    }
}
