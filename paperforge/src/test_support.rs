//! Test-only doubles for the generation service, the sandbox and documents.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{ParsedSections, RunRecord};
use crate::io::backend::{GenerationRequest, Generator, Role};
use crate::io::document::DocumentSource;
use crate::io::sandbox::{CommandRunner, RunOutcome, SandboxCommand, timeout_message};

/// Generator that replays queued responses per role and records every request.
///
/// A role with an empty queue fails, which exercises stage fallbacks.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: RefCell<HashMap<Role, VecDeque<String>>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, role: Role, response: impl Into<String>) -> Self {
        self.push_response(role, response);
        self
    }

    pub fn push_response(&self, role: Role, response: impl Into<String>) {
        self.responses
            .borrow_mut()
            .entry(role)
            .or_default()
            .push_back(response.into());
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }

    pub fn requests_for(&self, role: Role) -> Vec<GenerationRequest> {
        self.requests
            .borrow()
            .iter()
            .filter(|request| request.role == role)
            .cloned()
            .collect()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .get_mut(&request.role)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no scripted response for {}", request.role.as_str()))
    }
}

type Handler = Box<dyn Fn(&SandboxCommand, &Path) -> RunOutcome>;

/// Command runner driven by a closure; records every command it is asked to run.
pub struct ScriptedRunner {
    handler: Handler,
    calls: RefCell<Vec<SandboxCommand>>,
}

impl ScriptedRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&SandboxCommand, &Path) -> RunOutcome + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Every command succeeds and prints `stdout`.
    pub fn passing(stdout: &str) -> Self {
        let stdout = stdout.to_string();
        Self::new(move |_, _| RunOutcome {
            succeeded: true,
            stdout: stdout.clone(),
            ..RunOutcome::default()
        })
    }

    pub fn calls(&self) -> Vec<SandboxCommand> {
        self.calls.borrow().clone()
    }

    /// Entry-script invocations seen so far.
    pub fn entry_runs(&self) -> usize {
        self.calls.borrow().iter().filter(|c| is_entry(c)).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &SandboxCommand, workdir: &Path, _timeout: Duration) -> RunOutcome {
        self.calls.borrow_mut().push(command.clone());
        (self.handler)(command, workdir)
    }
}

pub fn is_entry(command: &SandboxCommand) -> bool {
    command.args.first().is_some_and(|arg| arg == "run_experiment.py")
}

pub fn succeeded(stdout: &str) -> RunOutcome {
    RunOutcome {
        succeeded: true,
        stdout: stdout.to_string(),
        ..RunOutcome::default()
    }
}

pub fn failed(stderr: &str) -> RunOutcome {
    RunOutcome::failed(stderr)
}

/// The outcome `ProcessRunner` produces for a command that hit its timeout.
pub fn timed_out(command: &SandboxCommand, timeout: Duration) -> RunOutcome {
    RunOutcome {
        succeeded: false,
        stdout: String::new(),
        stderr: timeout_message(command, timeout),
        timed_out: true,
    }
}

/// In-memory paper text.
#[derive(Debug, Clone)]
pub struct StaticDocument(pub String);

impl DocumentSource for StaticDocument {
    fn extract(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Generated code with no imports that reads `seed` and `n_agents`.
pub const SIMPLE_CODE: &str = r#"def run_experiment(config_path):
    with open(config_path) as fh:
        lines = [line.split(":", 1) for line in fh if ":" in line]
    config = {key.strip(): value.strip() for key, value in lines}
    seed = int(config["seed"])
    agents = int(config["n_agents"])
    return {"seed": seed, "agents": agents, "score": seed * agents}
"#;

pub fn sections() -> ParsedSections {
    ParsedSections {
        abstract_text: Some("We study decentralized consensus.".to_string()),
        methodology: Some("Agents average their states over a ring.".to_string()),
        algorithms: vec!["Algorithm 1: average with neighbours".to_string()],
        libraries: Vec::new(),
    }
}

/// A fresh record with caller-provided sections.
pub fn record_with_sections(run_id: &str) -> RunRecord {
    let mut record = RunRecord::new(run_id, "keep it small");
    record.parsed_sections = sections();
    record
}

pub const PLAN_JSON: &str = r#"{"overview":"Average states over a ring.","files":["method.py"],"classes":[],"functions":["run_experiment(config_path) -> dict"],"libraries":[],"implementation_notes":"Keep it deterministic."}"#;

pub fn review_json(verdict: &str, missing: &[&str], suggestions: &[&str]) -> String {
    serde_json::json!({
        "verdict": verdict,
        "summary": format!("{verdict} implementation"),
        "missing": missing,
        "suggestions": suggestions,
    })
    .to_string()
}

pub fn patch_json(analysis: &str, code: &str) -> String {
    serde_json::json!({"analysis": analysis, "action": "patch", "output": code}).to_string()
}

pub fn recode_json(analysis: &str, guidance: &str) -> String {
    serde_json::json!({"analysis": analysis, "action": "recode", "output": guidance}).to_string()
}
