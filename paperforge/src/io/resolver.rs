//! Dependency resolution inside the sandbox interpreter.
//!
//! Third-party imports are probed with the interpreter that will run the
//! project, never the host, and only the genuinely absent ones are installed.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::imports::{extract_imports, pip_name, third_party};
use crate::io::sandbox::{CommandRunner, SandboxCommand};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(120);

const PROBE_SCRIPT: &str = "\
import importlib.util, json, sys
for name in json.loads(sys.argv[1]):
    try:
        found = importlib.util.find_spec(name) is not None
    except Exception:
        found = False
    if not found:
        print(name)
";

/// Installing the missing packages failed. Fatal for the current attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallFailure {
    pub packages: Vec<String>,
    pub stderr: String,
}

impl fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to install packages {:?}:\n{}",
            self.packages, self.stderr
        )
    }
}

impl std::error::Error for InstallFailure {}

pub struct DependencyResolver<'a, R: CommandRunner> {
    runner: &'a R,
    python: &'a str,
    probe_timeout: Duration,
    install_timeout: Duration,
}

impl<'a, R: CommandRunner> DependencyResolver<'a, R> {
    pub fn new(runner: &'a R, python: &'a str) -> Self {
        Self {
            runner,
            python,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, probe: Duration, install: Duration) -> Self {
        self.probe_timeout = probe;
        self.install_timeout = install;
        self
    }

    /// Make every third-party import of `code` importable.
    ///
    /// Returns the pip package names that were installed (empty when nothing
    /// was missing). With no third-party imports no command is run at all.
    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    pub fn resolve(&self, code: &str, workdir: &Path) -> Result<Vec<String>, InstallFailure> {
        let candidates = third_party(&extract_imports(code));
        if candidates.is_empty() {
            debug!("no third-party imports");
            return Ok(Vec::new());
        }

        let missing = self.probe_missing(&candidates, workdir);
        if missing.is_empty() {
            debug!(count = candidates.len(), "all third-party imports present");
            return Ok(Vec::new());
        }

        let packages: Vec<String> = missing
            .iter()
            .map(|name| pip_name(name).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        info!(?packages, "installing missing packages");

        let mut args = vec!["-m".to_string(), "pip".to_string(), "install".to_string()];
        args.extend(packages.iter().cloned());
        let install = SandboxCommand::new(self.python, args);
        let outcome = self.runner.run(&install, workdir, self.install_timeout);
        if !outcome.succeeded {
            warn!(?packages, "package install failed");
            return Err(InstallFailure {
                packages,
                stderr: outcome.stderr,
            });
        }
        Ok(packages)
    }

    /// Names from `candidates` the sandbox interpreter cannot find.
    ///
    /// A probe that fails or times out reports nothing missing; the run itself
    /// will surface any import error.
    fn probe_missing(&self, candidates: &BTreeSet<String>, workdir: &Path) -> BTreeSet<String> {
        let names = match serde_json::to_string(candidates) {
            Ok(names) => names,
            Err(err) => {
                warn!(err = %err, "encode probe arguments");
                return BTreeSet::new();
            }
        };
        let probe = SandboxCommand::new(
            self.python,
            ["-c".to_string(), PROBE_SCRIPT.to_string(), names],
        );
        let outcome = self.runner.run(&probe, workdir, self.probe_timeout);
        if !outcome.succeeded {
            warn!(stderr = %outcome.stderr, "import probe failed; assuming nothing missing");
            return BTreeSet::new();
        }
        outcome
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| candidates.contains(*line))
            .map(str::to_string)
            .collect()
    }
}
