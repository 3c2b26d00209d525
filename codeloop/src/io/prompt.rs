//! Prompt builder for model queries.
//!
//! Templates are minijinja Markdown files compiled into the binary. Each
//! template is split into sections with `<!-- section:KEY required|droppable -->`
//! markers so the rendered prompt can be trimmed to a byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::io::collaborators::{Snippet, Turn};

const TEMPLATES: [(&str, &str); 7] = [
    ("planner", include_str!("prompts/planner.md")),
    ("reviewer", include_str!("prompts/reviewer.md")),
    ("developer", include_str!("prompts/developer.md")),
    ("answer", include_str!("prompts/answer.md")),
    ("diagnostics", include_str!("prompts/diagnostics.md")),
    ("intent", include_str!("prompts/intent.md")),
    ("decision", include_str!("prompts/decision.md")),
];

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 6] = [
    "history",
    "context",
    "summary",
    "observations",
    "feedback",
    "original",
];

/// Inputs for the planning prompt.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerPrompt<'a> {
    pub goal: &'a str,
    pub intent: &'a str,
    pub cycle: u32,
    /// Visible tool contracts, as rendered by the registry.
    pub tools: Vec<Value>,
    pub snippets: &'a [Snippet],
    pub summary: Option<&'a str>,
    /// Why the previous plan was rejected or what the reviewer asked for.
    pub feedback: Option<&'a str>,
    pub history: &'a [Turn],
}

/// Inputs for the developer (diff) prompt.
#[derive(Debug, Clone, Serialize)]
pub struct DeveloperPrompt<'a> {
    pub path: &'a str,
    pub original: &'a str,
    pub goal: &'a str,
    pub reason: &'a str,
    pub content: Option<&'a str>,
    pub file_exists: bool,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render {name} template"))
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("valid regex")
});

/// Parse sections from rendered template output using HTML comment markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map(|(next_start, ..)| *next_start)
            .unwrap_or(rendered.len());
        let content = rendered[*start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over budget: truncate the largest section.
    let total = total_len(sections);
    if total > budget
        && let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len())
    {
        let other_len = total - largest.content.len();
        let allowed = budget.saturating_sub(other_len);
        let before_len = largest.content.len();
        let keep = floor_char_boundary(&largest.content, allowed.saturating_sub(12));
        largest.content.truncate(keep);
        largest.content.push_str("\n[truncated]");
        debug!(
            section = %largest.key,
            before_len,
            after_len = largest.content.len(),
            "truncated section for budget"
        );
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    (0..=index)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0)
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|s| !s.is_empty())
}

/// Builds prompts within a byte budget, dropping less critical sections first.
pub struct PromptBuilder {
    budget_bytes: usize,
    engine: PromptEngine,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        Ok(Self {
            budget_bytes,
            engine: PromptEngine::new()?,
        })
    }

    fn build(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let rendered = self.engine.render(name, ctx)?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }

    pub fn planner(&self, input: &PlannerPrompt<'_>) -> Result<String> {
        let tools = serde_json::to_string_pretty(&input.tools).context("serialize tools")?;
        self.build(
            "planner",
            context! {
                goal => input.goal.trim(),
                intent => input.intent,
                cycle => input.cycle,
                tools => tools,
                snippets => input.snippets,
                summary => non_empty(input.summary),
                feedback => non_empty(input.feedback),
                history => input.history,
            },
        )
    }

    pub fn reviewer(&self, goal: &str, plan: &Value) -> Result<String> {
        let plan = serde_json::to_string_pretty(plan).context("serialize plan")?;
        self.build("reviewer", context! { goal => goal.trim(), plan => plan })
    }

    pub fn developer(&self, input: &DeveloperPrompt<'_>) -> Result<String> {
        self.build(
            "developer",
            context! {
                path => input.path,
                original => input.original,
                goal => input.goal.trim(),
                reason => non_empty(Some(input.reason)),
                content => input.content,
                file_exists => input.file_exists,
            },
        )
    }

    pub fn answer(
        &self,
        task: &str,
        intent: &str,
        snippets: &[Snippet],
        history: &[Turn],
    ) -> Result<String> {
        self.build(
            "answer",
            context! {
                task => task.trim(),
                intent => intent,
                snippets => snippets,
                history => history,
            },
        )
    }

    pub fn diagnostics(&self, stderr: &str) -> Result<String> {
        self.build("diagnostics", context! { stderr => stderr.trim() })
    }

    pub fn intent(&self, task: &str) -> Result<String> {
        self.build("intent", context! { task => task.trim() })
    }

    pub fn decision(
        &self,
        goal: &str,
        plan: &Value,
        observations: &str,
        deterministic: &str,
    ) -> Result<String> {
        let plan = serde_json::to_string_pretty(plan).context("serialize plan")?;
        self.build(
            "decision",
            context! {
                goal => goal.trim(),
                plan => plan,
                observations => non_empty(Some(observations)),
                deterministic => deterministic,
            },
        )
    }
}
