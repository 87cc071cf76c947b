//! Generation service abstraction.
//!
//! The [`Generator`] trait decouples pipeline stages from the model backend
//! (currently `codex exec`). Tests use scripted generators that return
//! predetermined responses without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::structured::{Structured, decode};
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Which pipeline role a request is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parser,
    Planner,
    Coder,
    Debugger,
    Reviewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Parser => "parser",
            Role::Planner => "planner",
            Role::Coder => "coder",
            Role::Debugger => "debugger",
            Role::Reviewer => "reviewer",
        }
    }
}

/// One call to the generation service.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub role: Role,
    pub prompt: String,
    /// JSON Schema constraining the response, for structured roles.
    pub output_schema: Option<&'static str>,
}

pub trait Generator {
    /// Return the raw response text for `request`.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        (**self).generate(request)
    }
}

/// Ask for structured output and decode it against `schema`.
///
/// Service errors and malformed responses both become
/// [`Structured::Malformed`]; this never fails.
#[instrument(skip_all, fields(role = role.as_str()))]
pub fn generate_structured<G: Generator + ?Sized, T: DeserializeOwned>(
    generator: &G,
    role: Role,
    prompt: String,
    schema: &'static str,
) -> Structured<T> {
    let schema_value: Value = match serde_json::from_str(schema) {
        Ok(value) => value,
        Err(err) => return Structured::malformed(format!("invalid output schema: {err}")),
    };
    let request = GenerationRequest {
        role,
        prompt,
        output_schema: Some(schema),
    };
    let raw = match generator.generate(&request) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(err = ?err, "generation failed");
            return Structured::malformed(format!("generation failed: {err:#}"));
        }
    };
    let decoded = decode(&raw, &schema_value);
    if let Structured::Malformed { reason } = &decoded {
        warn!(%reason, "malformed structured response");
    }
    decoded
}

/// Generator that spawns `codex exec` once per request.
///
/// Each call gets its own scratch directory under `scratch_root` holding the
/// prompt, the output schema, the last message and the process log.
#[derive(Debug)]
pub struct CodexGenerator {
    command: Vec<String>,
    scratch_root: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    calls: AtomicU32,
}

impl CodexGenerator {
    pub fn new(
        command: Vec<String>,
        scratch_root: PathBuf,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            command,
            scratch_root,
            timeout,
            output_limit_bytes,
            calls: AtomicU32::new(0),
        }
    }

    fn call_dir(&self, role: Role) -> Result<PathBuf> {
        let seq = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let dir = self
            .scratch_root
            .join(format!("{seq:03}-{}", role.as_str()));
        fs::create_dir_all(&dir)
            .with_context(|| format!("create generator dir {}", dir.display()))?;
        Ok(dir)
    }
}

impl Generator for CodexGenerator {
    #[instrument(skip_all, fields(role = request.role.as_str(), timeout_secs = self.timeout.as_secs()))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let (program, base_args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generator command is empty"))?;
        let dir = self.call_dir(request.role)?;
        info!(dir = %dir.display(), "starting generation");

        let prompt_path = dir.join("prompt.md");
        fs::write(&prompt_path, &request.prompt)
            .with_context(|| format!("write prompt {}", prompt_path.display()))?;
        let output_path = dir.join("output.txt");

        let mut cmd = Command::new(program);
        cmd.args(base_args);
        if let Some(schema) = request.output_schema {
            let schema_path = dir.join("output.schema.json");
            fs::write(&schema_path, schema)
                .with_context(|| format!("write schema {}", schema_path.display()))?;
            cmd.arg("--output-schema").arg(&schema_path);
        }
        cmd.arg("--output-last-message")
            .arg(&output_path)
            .arg("-")
            .current_dir(&dir);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run {program}"))?;

        write_generator_log(&dir.join("generator.log"), &output, self.output_limit_bytes)?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "generator timed out");
            return Err(anyhow!("{program} timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generator failed");
            return Err(anyhow!(
                "{program} failed with status {:?}",
                output.status.code()
            ));
        }

        let response = read_output(&output_path)?;
        debug!(bytes = response.len(), "generation completed");
        Ok(response)
    }
}

fn read_output(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(anyhow!("missing generator output {}", path.display()));
    }
    fs::read_to_string(path).with_context(|| format!("read generator output {}", path.display()))
}

fn write_generator_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&output.stdout_lossy());
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr_lossy());
    if output.timed_out {
        buf.push_str("\n[generator timed out]\n");
    }

    if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = buf.len() - cut;
        buf.truncate(cut);
        buf.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }
    fs::write(path, buf).with_context(|| format!("write generator log {}", path.display()))
}
