//! Project materialization: generated code in, file map out.
//!
//! [`materialize`] is pure. The same code and record always produce the same
//! map, so an attempt directory can be rebuilt byte-for-byte from the record.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde_json::{Map, Value};

use crate::core::config_keys::{Profile, detect_config_keys, render_yaml_config};
use crate::core::imports::requirements_text;
use crate::core::types::RunRecord;

const RUN_EXPERIMENT: &str = include_str!("templates/run_experiment.py");
const TEST_SMOKE: &str = include_str!("templates/test_smoke.py");
const TEST_CONTRACT: &str = include_str!("templates/test_contract.py");
const CI_WORKFLOW: &str = include_str!("templates/repro.yml");
const README_TEMPLATE: &str = include_str!("templates/README.md.j2");
const REPORT_TEMPLATE: &str = include_str!("templates/report.md.j2");

const GITIGNORE: &str = "__pycache__/\n*.pyc\n.venv/\nresults/*.png\n";
const SCRIPT_RUN: &str = "#!/usr/bin/env bash\nset -euo pipefail\n\npython run_experiment.py --config configs/default.yaml --output results/metrics.json\n";
const SCRIPT_EVAL: &str = "#!/usr/bin/env bash\nset -euo pipefail\n\npython run_experiment.py --config configs/ablation.yaml --output results/metrics_ablation.json\n";
const SRC_PROBLEM: &str = "\"\"\"Problem utilities for the generated reproduction project.\"\"\"\n";
const SRC_ALGORITHM: &str = "\"\"\"Algorithm helpers for the generated reproduction project.\"\"\"\n";
const SRC_METRICS: &str = "\"\"\"Metric utilities for the generated reproduction project.\"\"\"\n";
const SRC_UTILS: &str = "\"\"\"Generic utility functions for the generated reproduction project.\"\"\"\n\n\ndef seed_everything(seed: int) -> int:\n    return int(seed)\n";

const ABSTRACT_PREVIEW_CHARS: usize = 800;
const METHODOLOGY_PREVIEW_CHARS: usize = 1800;

/// Relative path → file contents, ordered by path.
pub type ProjectFiles = BTreeMap<String, String>;

/// Well-known paths inside a materialized project.
pub mod layout {
    pub const METHOD: &str = "method.py";
    pub const ENTRY: &str = "run_experiment.py";
    pub const DEFAULT_CONFIG: &str = "configs/default.yaml";
    pub const ABLATION_CONFIG: &str = "configs/ablation.yaml";
    pub const REQUIREMENTS: &str = "requirements.txt";
    pub const SMOKE_TEST: &str = "tests/test_smoke.py";
    pub const CONTRACT_TEST: &str = "tests/test_contract.py";
    pub const RESULTS_DIR: &str = "results";
    pub const METRICS: &str = "results/metrics.json";
    pub const REPORT: &str = "report.md";
}

struct ProjectTemplates {
    env: Environment<'static>,
}

impl ProjectTemplates {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.add_template("readme", README_TEMPLATE)
            .expect("readme template should be valid");
        env.add_template("report", REPORT_TEMPLATE)
            .expect("report template should be valid");
        Self { env }
    }
}

/// Build every file of the project for `code`.
///
/// `imports` is the statically detected import set; configuration keys are
/// detected from `code` here.
pub fn materialize(
    code: &str,
    record: &RunRecord,
    imports: &BTreeSet<String>,
) -> Result<ProjectFiles> {
    let config_keys = detect_config_keys(code);
    let readme = render_readme(record)?;

    let entries: [(&str, String); 18] = [
        (layout::METHOD, code.to_string()),
        (layout::ENTRY, RUN_EXPERIMENT.to_string()),
        ("README.md", readme),
        (layout::REQUIREMENTS, requirements_text(imports)),
        (".gitignore", GITIGNORE.to_string()),
        (
            layout::DEFAULT_CONFIG,
            render_yaml_config(&config_keys, Profile::Default),
        ),
        (
            layout::ABLATION_CONFIG,
            render_yaml_config(&config_keys, Profile::Ablation),
        ),
        ("src/__init__.py", String::new()),
        ("src/problem.py", SRC_PROBLEM.to_string()),
        ("src/algorithm.py", SRC_ALGORITHM.to_string()),
        ("src/metrics.py", SRC_METRICS.to_string()),
        ("src/utils.py", SRC_UTILS.to_string()),
        ("scripts/run.sh", SCRIPT_RUN.to_string()),
        ("scripts/eval.sh", SCRIPT_EVAL.to_string()),
        (layout::SMOKE_TEST, TEST_SMOKE.to_string()),
        (layout::CONTRACT_TEST, TEST_CONTRACT.to_string()),
        ("results/.gitkeep", String::new()),
        (".github/workflows/repro.yml", CI_WORKFLOW.to_string()),
    ];

    Ok(entries
        .into_iter()
        .map(|(path, contents)| (path.to_string(), contents))
        .collect())
}

fn render_readme(record: &RunRecord) -> Result<String> {
    let sections = &record.parsed_sections;
    let instructions = match record.user_instructions.trim() {
        "" => "None provided",
        text => text,
    };
    let abstract_text = match sections.abstract_or_empty() {
        "" => "Abstract not extracted.",
        text => truncate_chars(text, ABSTRACT_PREVIEW_CHARS),
    };
    let methodology = match sections.methodology_or_empty() {
        "" => "Methodology not extracted.",
        text => truncate_chars(text, METHODOLOGY_PREVIEW_CHARS),
    };

    let templates = ProjectTemplates::new();
    let rendered = templates
        .env
        .get_template("readme")?
        .render(context! {
            instructions => instructions,
            abstract_text => abstract_text,
            methodology => methodology,
        })
        .context("render project README")?;
    Ok(rendered)
}

/// Inputs for `report.md`.
#[derive(Debug, Clone)]
pub struct ReportInputs<'a> {
    pub record: &'a RunRecord,
    pub metrics: &'a Map<String, Value>,
    pub tests_passed: bool,
    pub experiment_passed: bool,
}

/// Render the reproduction report written at the project root.
pub fn render_report(inputs: &ReportInputs<'_>) -> Result<String> {
    let record = inputs.record;
    let metrics_json =
        serde_json::to_string_pretty(inputs.metrics).context("serialize metrics")?;
    let review_json = match &record.review_feedback {
        Some(feedback) => serde_json::to_string_pretty(feedback).context("serialize review")?,
        None => "{}".to_string(),
    };
    let methodology = match record.parsed_sections.methodology_or_empty() {
        "" => "N/A",
        text => truncate_chars(text, METHODOLOGY_PREVIEW_CHARS),
    };

    let templates = ProjectTemplates::new();
    let rendered = templates
        .env
        .get_template("report")?
        .render(context! {
            tests_passed => inputs.tests_passed,
            experiment_passed => inputs.experiment_passed,
            revision_count => record.revision_count,
            review_iteration => record.review_iteration,
            metrics_json => metrics_json,
            review_json => review_json,
            methodology => methodology,
        })
        .context("render report")?;
    Ok(rendered)
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
