//! Role prompt builder with a byte budget.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the budget, droppable sections are removed
//! in a fixed order and the last remaining section is truncated. Error output
//! keeps its end, where the failing cause is.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::{FailureRecord, RunRecord};

const PARSER_TEMPLATE: &str = include_str!("prompts/parser.md");
const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const DEBUGGER_TEMPLATE: &str = include_str!("prompts/debugger.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");

/// Droppable sections, least important first.
const DROP_ORDER: &[&str] = &[
    "output",
    "algorithms",
    "history",
    "methodology",
    "metrics",
    "instructions",
    "requirements",
    "guidance",
];

/// Sections truncated from the front, with the number of leading lines kept.
const TAIL_KEPT_SECTIONS: &[(&str, usize)] = &[("error", 2)];

const HISTORY_ERROR_CHARS: usize = 300;
const TRUNCATION_MARKER: &str = "\n[truncated]";
const HEAD_TRUNCATION_MARKER: &str = "[truncated]\n";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex is valid")
});

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("parser", PARSER_TEMPLATE),
            ("planner", PLANNER_TEMPLATE),
            ("coder", CODER_TEMPLATE),
            ("debugger", DEBUGGER_TEMPLATE),
            ("reviewer", REVIEWER_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("prompt template should be valid");
        }
        Self { env }
    }

    fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))
    }
}

/// Prior failure as shown to the debugger.
#[derive(Debug, Serialize)]
struct HistoryEntry<'a> {
    action: &'a str,
    error: &'a str,
    analysis: &'a str,
}

impl<'a> HistoryEntry<'a> {
    fn from_failure(failure: &'a FailureRecord) -> Self {
        Self {
            action: failure.action.as_str(),
            error: tail_chars(failure.error.trim_end(), HISTORY_ERROR_CHARS),
            analysis: &failure.analysis,
        }
    }
}

/// Last `max` characters of `text`.
fn tail_chars(text: &str, max: usize) -> &str {
    if max == 0 {
        return "";
    }
    text.char_indices()
        .rev()
        .nth(max - 1)
        .map_or(text, |(start, _)| &text[start..])
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Builds role prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn parser(&self, paper_text: &str) -> Result<String> {
        let rendered = PromptEngine::new().render(
            "parser",
            context! { paper => paper_text.trim() },
        )?;
        Ok(self.fit(&rendered))
    }

    pub fn planner(&self, record: &RunRecord) -> Result<String> {
        let sections_json = serde_json::to_string_pretty(&record.parsed_sections)
            .context("serialize parsed sections")?;
        let rendered = PromptEngine::new().render(
            "planner",
            context! {
                instructions => non_empty(&record.user_instructions),
                sections_json => sections_json,
            },
        )?;
        Ok(self.fit(&rendered))
    }

    /// Coder prompt. Carries recode guidance and review requirements when the
    /// record has them.
    pub fn coder(&self, record: &RunRecord) -> Result<String> {
        let plan_json = serde_json::to_string_pretty(&record.implementation_plan)
            .context("serialize implementation plan")?;
        let sections = &record.parsed_sections;
        let algorithms = if sections.algorithms.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string_pretty(&sections.algorithms)
                    .context("serialize algorithms")?,
            )
        };
        let rendered = PromptEngine::new().render(
            "coder",
            context! {
                guidance => record.recode_guidance().and_then(non_empty),
                requirements => record.review_requirements,
                instructions => non_empty(&record.user_instructions),
                algorithms => algorithms,
                methodology => non_empty(sections.methodology_or_empty()),
                plan_json => plan_json,
            },
        )?;
        Ok(self.fit(&rendered))
    }

    pub fn debugger(&self, record: &RunRecord) -> Result<String> {
        let history: Vec<HistoryEntry<'_>> = record
            .error_history
            .iter()
            .map(HistoryEntry::from_failure)
            .collect();
        let rendered = PromptEngine::new().render(
            "debugger",
            context! {
                history => history,
                code => record.generated_code.trim_end(),
                error => record.execution_error.trim(),
            },
        )?;
        Ok(self.fit(&rendered))
    }

    pub fn reviewer(&self, record: &RunRecord) -> Result<String> {
        let metrics_json = if record.observed_metrics.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string_pretty(&record.observed_metrics)
                    .context("serialize observed metrics")?,
            )
        };
        let rendered = PromptEngine::new().render(
            "reviewer",
            context! {
                methodology => non_empty(record.parsed_sections.methodology_or_empty()),
                execution_success => record.execution_success,
                revision_count => record.revision_count,
                metrics_json => metrics_json,
                output => non_empty(&record.execution_output),
                code => record.generated_code.trim_end(),
            },
        )?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

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
    for (i, (_, body_start, key, required)) in markers.iter().enumerate() {
        let body_end = markers
            .get(i + 1)
            .map_or(rendered.len(), |(next_start, ..)| *next_start);
        let content = rendered[*body_start..body_end].trim().to_string();
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

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let Some((last, rest)) = sections.split_last_mut() else {
        return;
    };
    let other_len: usize = rest.iter().map(|s| s.content.len()).sum();
    let allowed = budget.saturating_sub(other_len);
    let before_len = last.content.len();
    let tail_kept = TAIL_KEPT_SECTIONS
        .iter()
        .find(|(key, _)| *key == last.key)
        .map(|(_, head_lines)| *head_lines);
    if let Some(head_lines) = tail_kept {
        truncate_keep_tail(&mut last.content, allowed, head_lines);
    } else if allowed > TRUNCATION_MARKER.len() {
        truncate_at_boundary(&mut last.content, allowed - TRUNCATION_MARKER.len());
        last.content.push_str(TRUNCATION_MARKER);
    } else {
        truncate_at_boundary(&mut last.content, allowed);
    }
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_at_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Keep the first `head_lines` lines and as much of the end as fits.
fn truncate_keep_tail(text: &mut String, max_bytes: usize, head_lines: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let head_end = match head_lines {
        0 => 0,
        n => text
            .match_indices('\n')
            .nth(n - 1)
            .map_or(text.len(), |(i, _)| i + 1),
    };
    let fixed = head_end + HEAD_TRUNCATION_MARKER.len();
    if fixed >= max_bytes {
        truncate_at_boundary(text, max_bytes);
        return;
    }
    let mut start = text.len() - (max_bytes - fixed);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = text.split_off(start);
    text.truncate(head_end);
    text.push_str(HEAD_TRUNCATION_MARKER);
    text.push_str(&tail);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
