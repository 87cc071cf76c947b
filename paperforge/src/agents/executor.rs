//! Executor stage: materialize, install, test and run one attempt.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::imports::extract_imports;
use crate::core::materialize::{ReportInputs, materialize, render_report};
use crate::core::metrics::extract_metrics;
use crate::core::types::RunRecord;
use crate::io::artifacts::{AttemptCapture, write_report, write_run_artifacts};
use crate::io::project::{RunPaths, write_project};
use crate::io::resolver::DependencyResolver;
use crate::io::sandbox::{CommandRunner, entry_command, prefixed_log, test_command};

/// Interpreter and timeouts for sandboxed execution.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub python: String,
    pub probe_timeout: Duration,
    pub install_timeout: Duration,
    pub test_timeout: Duration,
    pub run_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            probe_timeout: Duration::from_secs(15),
            install_timeout: Duration::from_secs(120),
            test_timeout: Duration::from_secs(60),
            run_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorAgent {
    settings: ExecutorSettings,
}

struct AttemptLogs {
    tests_passed: bool,
    experiment_passed: bool,
    stdout: String,
    stderr: String,
    entry_stdout: String,
}

impl ExecutorAgent {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self { settings }
    }

    /// Run attempt `seq` of the current code in a fresh project directory.
    ///
    /// Install failures, non-zero exits and timeouts are recorded as a failed
    /// attempt. Only filesystem errors propagate.
    #[instrument(skip_all, fields(seq = seq, revision = record.revision_count, review_iteration = record.review_iteration))]
    pub fn run<R: CommandRunner>(
        &self,
        runner: &R,
        paths: &RunPaths,
        seq: u32,
        record: &mut RunRecord,
    ) -> Result<()> {
        let project_dir =
            paths.create_attempt_dir(seq, record.review_iteration, record.revision_count)?;
        let code = record.generated_code.clone();
        let imports = extract_imports(&code);
        let files = materialize(&code, record, &imports)?;
        write_project(&project_dir, &files)?;
        info!(dir = %project_dir.display(), "materialized project");

        let resolver = DependencyResolver::new(runner, &self.settings.python)
            .with_timeouts(self.settings.probe_timeout, self.settings.install_timeout);
        let logs = match resolver.resolve(&code, &project_dir) {
            Ok(_) => self.run_attempt(runner, &project_dir),
            Err(failure) => {
                warn!(packages = ?failure.packages, "dependency install failed");
                AttemptLogs {
                    tests_passed: false,
                    experiment_passed: false,
                    stdout: String::new(),
                    stderr: failure.to_string(),
                    entry_stdout: String::new(),
                }
            }
        };

        let metrics = extract_metrics(&logs.entry_stdout);
        let report = render_report(&ReportInputs {
            record,
            metrics: &metrics,
            tests_passed: logs.tests_passed,
            experiment_passed: logs.experiment_passed,
        })?;
        write_report(&project_dir, &report)?;
        let run_result = write_run_artifacts(
            &project_dir,
            &AttemptCapture {
                tests_passed: logs.tests_passed,
                experiment_passed: logs.experiment_passed,
                combined_stdout: &logs.stdout,
                combined_stderr: &logs.stderr,
                metrics: &metrics,
            },
        )?;

        let success = run_result.success;
        info!(
            tests_passed = logs.tests_passed,
            experiment_passed = logs.experiment_passed,
            success,
            "attempt finished"
        );
        record.execution_error = if success { String::new() } else { logs.stderr };
        record.execution_output = logs.stdout;
        record.execution_success = success;
        record.observed_metrics = metrics;
        record.report_markdown = report;
        record.run_result = Some(run_result);
        record.output_repo_path = Some(project_dir);
        record.status = if success {
            "executed successfully".to_string()
        } else {
            "execution failed".to_string()
        };
        Ok(())
    }

    fn run_attempt<R: CommandRunner>(&self, runner: &R, project_dir: &Path) -> AttemptLogs {
        let tests_cmd = test_command(&self.settings.python);
        let entry_cmd = entry_command(&self.settings.python);
        let tests = runner.run(&tests_cmd, project_dir, self.settings.test_timeout);
        let entry = runner.run(&entry_cmd, project_dir, self.settings.run_timeout);

        let stdout = format!(
            "{}\n{}\n",
            prefixed_log(&tests_cmd, &tests.stdout),
            prefixed_log(&entry_cmd, &entry.stdout)
        );
        let stderr = format!(
            "{}\n{}\n",
            prefixed_log(&tests_cmd, &tests.stderr),
            prefixed_log(&entry_cmd, &entry.stderr)
        );
        AttemptLogs {
            tests_passed: tests.succeeded,
            experiment_passed: entry.succeeded,
            stdout,
            stderr,
            entry_stdout: entry.stdout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sandbox::RunOutcome;
    use crate::test_support::ScriptedRunner;

    const CODE: &str = "def run_experiment(config_path):\n    return {'acc': 1.0}\n";

    fn record() -> RunRecord {
        let mut record = RunRecord::new("run-1", "");
        record.generated_code = CODE.to_string();
        record
    }

    #[test]
    fn successful_attempt_updates_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "run-1");
        let runner = ScriptedRunner::passing("{\"acc\": 1.0}\n");
        let mut rec = record();

        ExecutorAgent::new(ExecutorSettings::default())
            .run(&runner, &paths, 1, &mut rec)
            .expect("execute");

        assert!(rec.execution_success);
        assert!(rec.execution_error.is_empty());
        assert_eq!(rec.observed_metrics["acc"], serde_json::json!(1.0));
        assert!(rec.execution_output.starts_with("$ python3 -m unittest"));
        assert!(rec.report_markdown.contains("- Test suite pass: true"));
        let project = rec.output_repo_path.clone().expect("project dir");
        assert!(project.ends_with("attempts/attempt-01-i0-r0"));
        assert!(project.join("method.py").is_file());
        assert!(project.join("results/run.log").is_file());
        assert!(project.join("report.md").is_file());
        // No third-party imports: only the two sandboxed runs.
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn failing_entry_records_combined_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "run-1");
        let runner = ScriptedRunner::new(|command, _| {
            if command.args.iter().any(|a| a == "unittest") {
                RunOutcome {
                    succeeded: true,
                    ..RunOutcome::default()
                }
            } else {
                RunOutcome::failed("Traceback: ValueError")
            }
        });
        let mut rec = record();
        ExecutorAgent::new(ExecutorSettings::default())
            .run(&runner, &paths, 1, &mut rec)
            .expect("execute");

        assert!(!rec.execution_success);
        assert!(rec.execution_error.contains("$ python3 run_experiment.py"));
        assert!(rec.execution_error.contains("Traceback: ValueError"));
        let result = rec.run_result.expect("run result");
        assert!(result.tests_passed);
        assert!(!result.experiment_passed);
        assert_eq!(rec.status, "execution failed");
    }

    #[test]
    fn install_failure_is_execution_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "run-1");
        let runner = ScriptedRunner::new(|command, _| {
            if command.args.first().map(String::as_str) == Some("-c") {
                RunOutcome {
                    succeeded: true,
                    stdout: "numpy\n".to_string(),
                    ..RunOutcome::default()
                }
            } else {
                RunOutcome::failed("network unreachable")
            }
        });
        let mut rec = record();
        rec.generated_code = format!("import numpy\n{CODE}");
        ExecutorAgent::new(ExecutorSettings::default())
            .run(&runner, &paths, 2, &mut rec)
            .expect("execute");

        assert!(!rec.execution_success);
        assert_eq!(
            rec.execution_error,
            "Failed to install packages [\"numpy\"]:\nnetwork unreachable"
        );
        assert!(rec.execution_output.is_empty());
        // Probe and install only; the project never ran.
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn each_attempt_gets_a_fresh_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "run-1");
        let runner = ScriptedRunner::passing("{}\n");
        let agent = ExecutorAgent::new(ExecutorSettings::default());
        let mut rec = record();
        agent.run(&runner, &paths, 1, &mut rec).expect("first");
        let first = rec.output_repo_path.clone();
        agent.run(&runner, &paths, 2, &mut rec).expect("second");
        assert_ne!(first, rec.output_repo_path);
        assert!(agent.run(&runner, &paths, 2, &mut rec).is_err());
    }
}
