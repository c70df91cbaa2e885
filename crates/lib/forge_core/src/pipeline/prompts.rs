//! Stage prompt templates.

use crate::models::run::{AgentKind, AgentResult};

/// System + user message pair sent for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Everything a template may draw on for one stage.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub task: &'a str,
    pub language: &'a str,
    pub preset: Option<&'a str>,
    /// Accepted results of the stages this one depends on.
    pub prior: &'a [AgentResult],
}

impl StageInput<'_> {
    /// Accepted response of a prior stage, if it ran.
    pub fn prior_response(&self, agent: AgentKind) -> Option<&str> {
        self.prior
            .iter()
            .find(|r| r.agent_type == agent)
            .map(|r| r.response.as_str())
    }
}

/// Builds the prompt for a stage.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, agent: AgentKind, input: &StageInput<'_>) -> Prompt;
}

/// Built-in templates for the three roles.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrompts;

impl PromptBuilder for DefaultPrompts {
    fn build(&self, agent: AgentKind, input: &StageInput<'_>) -> Prompt {
        match agent {
            AgentKind::Front => front_prompt(input),
            AgentKind::Back => back_prompt(input),
            AgentKind::Qa => qa_prompt(input),
        }
    }
}

fn preset_line(input: &StageInput<'_>) -> String {
    input
        .preset
        .map(|p| format!("- Target stack preset: {p}. Follow its conventions and file layout.\n"))
        .unwrap_or_default()
}

fn front_prompt(input: &StageInput<'_>) -> Prompt {
    Prompt {
        system: "You are a senior front-end engineer. Provide production-ready UI snippets \
                 and integration notes."
            .into(),
        user: format!(
            "Project task: {task}\n\
             \n\
             Constraints:\n\
             - Backend integration language: {language}\n\
             - Provide three labelled files: index.html, styles.css and script.js. Wrap each \
             file in its own fenced Markdown code block with the filename as a comment.\n\
             - List the backend endpoints the UI expects (URL, method, JSON payload shape).\n\
             - Keep the code minimal, copy-pastable and commented.\n",
            task = input.task,
            language = input.language,
        ),
    }
}

fn back_prompt(input: &StageInput<'_>) -> Prompt {
    Prompt {
        system: "You are a senior backend engineer. Return production-ready server code and a \
                 compact API contract. Use a single server entrypoint and one consistent API base."
            .into(),
        user: format!(
            "Project task: {task}\n\
             \n\
             Output rules:\n\
             - Respond with fenced Markdown code blocks and short comments only.\n\
             - Write runnable server code in {language}, stating assumptions as comments at the top.\n\
             - Exactly one server process and one entrypoint. Put every route under the base `/api`.\n\
             - Define the routes, request validation and any data models the task needs.\n\
             {preset}\
             - Finish with a JSON code block named `api_contract.json` describing base_url, \
             endpoints (path, method, request, response), auth requirements and example curl calls.\n",
            task = input.task,
            language = input.language,
            preset = preset_line(input),
        ),
    }
}

fn qa_prompt(input: &StageInput<'_>) -> Prompt {
    let front = input.prior_response(AgentKind::Front).unwrap_or("(not generated)");
    let back = input.prior_response(AgentKind::Back).unwrap_or("(not generated)");
    Prompt {
        system: "You are an experienced QA engineer. Produce manual and automated tests and a \
                 risk checklist for the code you are given."
            .into(),
        user: format!(
            "Project task: {task}\n\
             Language: {language}\n\
             \n\
             Front-end output:\n\
             {front}\n\
             \n\
             Back-end output:\n\
             {back}\n\
             \n\
             Requirements:\n\
             - Manual test cases with steps and expected results, naming the concrete routes, \
             elements and functions from the outputs above.\n\
             - Automated tests in {language} (pytest for Python, jest for Node.js, JUnit for Java) \
             with explicit assertions.\n\
             {preset}\
             - A checklist of integration points and risks, and the commands that run the tests.\n",
            task = input.task,
            language = input.language,
            preset = preset_line(input),
        ),
    }
}
