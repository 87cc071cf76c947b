//! Sandboxed execution of a materialized project.
//!
//! [`CommandRunner`] is the seam between the executor stage and real
//! processes. It never fails: spawn errors and timeouts come back as an
//! unsuccessful [`RunOutcome`] whose stderr names the problem.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::materialize::layout;
use crate::io::process::run_command_with_timeout;

/// A program and its arguments, without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl SandboxCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The literal command line, as shown in combined logs and timeout messages.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Result of one sandboxed invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Zero exit within the timeout.
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl RunOutcome {
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: stderr.into(),
            timed_out: false,
        }
    }
}

pub trait CommandRunner {
    fn run(&self, command: &SandboxCommand, workdir: &Path, timeout: Duration) -> RunOutcome;
}

/// Runs commands as child processes in their own process group.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    pub output_limit_bytes: usize,
}

impl CommandRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %command.program, workdir = %workdir.display()))]
    fn run(&self, command: &SandboxCommand, workdir: &Path, timeout: Duration) -> RunOutcome {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).current_dir(workdir);

        let output = match run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = ?err, "sandboxed command did not start");
                return RunOutcome::failed(format!(
                    "Failed to run {}: {err:#}",
                    command.display()
                ));
            }
        };

        if output.timed_out {
            return RunOutcome {
                succeeded: false,
                stdout: output.stdout_lossy(),
                stderr: timeout_message(command, timeout),
                timed_out: true,
            };
        }
        debug!(exit_code = ?output.status.code(), "sandboxed command finished");
        RunOutcome {
            succeeded: output.status.success(),
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            timed_out: false,
        }
    }
}

pub fn timeout_message(command: &SandboxCommand, timeout: Duration) -> String {
    format!(
        "Command timed out after {}: {}",
        format_seconds(timeout),
        command.display()
    )
}

/// `60s` for whole seconds, otherwise up to millisecond precision (`0.25s`).
fn format_seconds(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        return format!("{}s", duration.as_secs());
    }
    let text = format!("{:.3}", duration.as_secs_f64());
    format!("{}s", text.trim_end_matches('0'))
}

/// Discover and run the project's test suite.
pub fn test_command(python: &str) -> SandboxCommand {
    SandboxCommand::new(
        python,
        ["-m", "unittest", "discover", "-s", "tests", "-p", "test_*.py"],
    )
}

/// Run the entry script against the primary configuration.
pub fn entry_command(python: &str) -> SandboxCommand {
    SandboxCommand::new(
        python,
        [
            layout::ENTRY,
            "--config",
            layout::DEFAULT_CONFIG,
            "--output",
            layout::METRICS,
        ],
    )
}

/// Prefix an invocation's output with the command line that produced it.
pub fn prefixed_log(command: &SandboxCommand, text: &str) -> String {
    format!("$ {}\n{}", command.display(), text)
}
