//! Pipeline configuration stored in `paperforge.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::{Budgets, MAX_REVIEW_ITERATIONS, MAX_REVISIONS};

pub const CONFIG_FILE_NAME: &str = "paperforge.toml";

/// Pipeline configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to the defaults
/// below; a missing `[publish]` table disables publishing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Interpreter used for probing, installing and running generated projects.
    pub python: String,

    /// Root under which each run gets `<run_id>/`.
    pub output_dir: PathBuf,

    pub max_revisions: u32,
    pub max_review_iterations: u32,

    pub install_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub test_timeout_secs: u64,
    pub run_timeout_secs: u64,

    /// Truncate captured stdout/stderr of sandboxed commands beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Characters of extracted paper text handed to the parser.
    pub document_char_limit: usize,

    /// Byte budget for every rendered role prompt.
    pub prompt_budget_bytes: usize,

    pub generator: GeneratorConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Program and leading arguments. Output-schema and output-file flags are appended.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: [
                "codex",
                "exec",
                "-c",
                "model_reasoning_effort=medium",
                "--sandbox",
                "read-only",
                "--skip-git-repo-check",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            timeout_secs: 600,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    /// GitHub owner (user or org). Empty publishes under the authenticated user.
    pub owner: String,
    pub private: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            output_dir: PathBuf::from("output"),
            max_revisions: MAX_REVISIONS,
            max_review_iterations: MAX_REVIEW_ITERATIONS,
            install_timeout_secs: 120,
            probe_timeout_secs: 15,
            test_timeout_secs: 60,
            run_timeout_secs: 60,
            output_limit_bytes: 200_000,
            document_char_limit: 12_000,
            prompt_budget_bytes: 48_000,
            generator: GeneratorConfig::default(),
            publish: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.python.trim().is_empty() {
            return Err(anyhow!("python must be non-empty"));
        }
        for (name, secs) in [
            ("install_timeout_secs", self.install_timeout_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("test_timeout_secs", self.test_timeout_secs),
            ("run_timeout_secs", self.run_timeout_secs),
            ("generator.timeout_secs", self.generator.timeout_secs),
        ] {
            if secs == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.document_char_limit == 0 {
            return Err(anyhow!("document_char_limit must be > 0"));
        }
        if self.prompt_budget_bytes < 1024 {
            return Err(anyhow!("prompt_budget_bytes must be >= 1024"));
        }
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn budgets(&self) -> Budgets {
        Budgets {
            max_revisions: self.max_revisions,
            max_review_iterations: self.max_review_iterations,
        }
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
