//! Contract validator.
//!
//! Checks that an agent's free-text output has the minimum structure its
//! role requires before anything downstream consumes it. The checks are
//! heuristics over Markdown code blocks and well-known code markers, not a
//! grammar: they reject output that is empty, prose-only, an echo of the
//! task, or (for QA) generic boilerplate unrelated to the code under test.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};
use regex::Regex;
use serde::Serialize;

use crate::models::run::{AgentKind, AgentResult};

/// Result of validating one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// Inputs a contract may compare the response against.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub task: &'a str,
    /// Accepted outputs of earlier stages.
    pub prior: &'a [AgentResult],
}

/// A fenced or indented code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub code: String,
}

/// Extract every code block from Markdown text.
pub fn code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<CodeBlock> = None;
    for event in Parser::new(text) {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(|l| l.to_ascii_lowercase()),
                    CodeBlockKind::Indented => None,
                };
                current = Some(CodeBlock {
                    language,
                    code: String::new(),
                });
            }
            Event::Text(t) => {
                if let Some(block) = current.as_mut() {
                    block.code.push_str(&t);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some(block) = current.take()
                    && !block.code.trim().is_empty()
                {
                    blocks.push(block);
                }
            }
            _ => {}
        }
    }
    blocks
}

const FRONT_LANGS: &[&str] = &[
    "html", "htm", "xml", "css", "scss", "sass", "less", "js", "javascript", "jsx", "ts",
    "typescript", "tsx", "vue", "svelte",
];

static FRONT_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<\s*(?:!doctype|html|head|body|div|form|input|button|script|style|section|main|template)\b|\b(?:index\.html|styles?\.css|script\.js|app\.jsx?)\b|\bdocument\.\w+|addEventListener\s*\(|[.#][\w-]+\s*\{[^}]*:",
    )
    .expect("front marker regex is valid")
});

static BACK_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)@\w*\.?(?:route|get|post|put|delete|patch)\s*\(|\b(?:app|router|server)\.(?:get|post|put|delete|patch|use|listen|route)\s*\(|@(?:Get|Post|Put|Delete|Patch|Request)Mapping\b|@RestController\b|\b(?:FastAPI|APIRouter|Flask|Blueprint|express)\s*\(|#\[(?:get|post|put|delete|patch)\(|\bRouter::new\s*\(|\bCREATE\s+TABLE\b|@Entity\b|\bclass\s+\w+|\bdef\s+\w+\s*\(|\bfunction\s+\w+\s*\(|\bstruct\s+\w+|\bhttp\.HandleFunc\b|\bmodels?\.\w+",
    )
    .expect("back marker regex is valid")
});

static QA_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bassert\w*\b|\bexpect\s*\(|\.should\b|\bdef\s+test_\w+|\b(?:it|test|describe)\s*\(\s*['`]|@Test\b|\btest[\s_-]*case|\bexpected\s+(?:result|output|behaviou?r|status)|\bgiven\b[^\n]*\bwhen\b[^\n]*\bthen\b",
    )
    .expect("qa marker regex is valid")
});

static PATH_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["'`](/[A-Za-z0-9_\-./{}:<>]*[A-Za-z0-9_}>])["'`]"#).expect("path regex is valid")
});

static ID_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:id|name)\s*=\s*["']([A-Za-z][\w-]{2,})["']"#).expect("id regex is valid")
});

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]{4,}\b").expect("ident regex is valid"));

/// Library identifiers common enough to appear in unrelated test boilerplate.
const GENERIC_IDENTIFIERS: &[&str] = &[
    "addEventListener",
    "getElementById",
    "querySelector",
    "querySelectorAll",
    "preventDefault",
    "innerHTML",
    "textContent",
    "innerText",
    "createElement",
    "appendChild",
    "classList",
    "setTimeout",
    "toString",
    "JSONResponse",
    "jsonify",
    "request_json",
    "status_code",
    "get_json",
    "test_client",
    "content_type",
    "response_model",
    "readyState",
    "onClick",
    "onChange",
    "useState",
    "useEffect",
    "ResponseEntity",
    "HttpStatus",
    "RestController",
    "RequestMapping",
    "GetMapping",
    "PostMapping",
    "RequestBody",
    "PathVariable",
    "SpringApplication",
    "SpringBootApplication",
    "toBe",
    "toEqual",
    "beforeEach",
    "afterEach",
];

/// Distinctive names from prior outputs that QA is expected to mention.
fn anchors(prior: &[AgentResult]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for result in prior {
        let text = &result.response;
        for cap in PATH_LITERAL.captures_iter(text) {
            let path = &cap[1];
            if path.len() > 1 {
                out.insert(path.to_string());
            }
        }
        for cap in ID_ATTRIBUTE.captures_iter(text) {
            out.insert(cap[1].to_string());
        }
        for block in code_blocks(text) {
            for m in IDENTIFIER.find_iter(&block.code) {
                let ident = m.as_str();
                if is_distinctive(ident) && !GENERIC_IDENTIFIERS.contains(&ident) {
                    out.insert(ident.to_string());
                }
            }
        }
    }
    out
}

/// snake_case or camelCase names; plain words are too likely to collide.
fn is_distinctive(ident: &str) -> bool {
    let bytes = ident.as_bytes();
    let inner_underscore = bytes
        .windows(3)
        .any(|w| w[1] == b'_' && w[0].is_ascii_alphanumeric() && w[2].is_ascii_alphanumeric());
    let camel = bytes
        .windows(2)
        .any(|w| w[0].is_ascii_lowercase() && w[1].is_ascii_uppercase());
    inner_underscore || camel
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Checks agent responses against their role contracts. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractValidator;

impl ContractValidator {
    pub fn validate(
        &self,
        agent: AgentKind,
        response: &str,
        ctx: &ValidationContext<'_>,
    ) -> Verdict {
        if response.trim().is_empty() {
            return Verdict::fail(format!("{agent} response is empty"));
        }
        let blocks = code_blocks(response);
        match agent {
            AgentKind::Front => validate_front(response, &blocks),
            AgentKind::Back => validate_back(response, &blocks, ctx),
            AgentKind::Qa => validate_qa(response, ctx),
        }
    }
}

fn validate_front(response: &str, blocks: &[CodeBlock]) -> Verdict {
    if blocks.is_empty() {
        return Verdict::fail("front response contains no code block");
    }
    let tagged = blocks.iter().any(|b| {
        b.language
            .as_deref()
            .is_some_and(|l| FRONT_LANGS.contains(&l))
    });
    if tagged || FRONT_MARKERS.is_match(response) {
        Verdict::pass()
    } else {
        Verdict::fail("front response has no markup, style or script content")
    }
}

fn validate_back(response: &str, blocks: &[CodeBlock], ctx: &ValidationContext<'_>) -> Verdict {
    if blocks.is_empty() {
        return Verdict::fail("back response contains no code block");
    }
    let task = normalize(ctx.task);
    if !task.is_empty() {
        let echoes_task = normalize(response) == task
            || blocks.iter().all(|b| normalize(&b.code) == task);
        if echoes_task {
            return Verdict::fail("back response only echoes the task");
        }
    }
    if blocks.iter().any(|b| BACK_MARKERS.is_match(&b.code)) {
        Verdict::pass()
    } else {
        Verdict::fail("back response defines no routes, services or models")
    }
}

fn validate_qa(response: &str, ctx: &ValidationContext<'_>) -> Verdict {
    if !QA_MARKERS.is_match(response) {
        return Verdict::fail("qa response has no test cases or assertions");
    }
    let anchors = anchors(ctx.prior);
    // Nothing distinctive upstream (or no upstream stages): nothing to
    // cross-reference.
    if anchors.is_empty() {
        return Verdict::pass();
    }
    if anchors.iter().any(|a| response.contains(a.as_str())) {
        Verdict::pass()
    } else {
        Verdict::fail("qa response does not reference the front or back output")
    }
}
