//! Run artifacts persisted into a materialized attempt.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::materialize::layout;
use crate::core::metrics::flatten_key_metrics;
use crate::core::types::RunResult;

const PLOT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "svg"];

/// Everything captured from one attempt.
#[derive(Debug, Clone)]
pub struct AttemptCapture<'a> {
    pub tests_passed: bool,
    pub experiment_passed: bool,
    pub combined_stdout: &'a str,
    pub combined_stderr: &'a str,
    pub metrics: &'a Map<String, Value>,
}

impl AttemptCapture<'_> {
    pub fn success(&self) -> bool {
        self.tests_passed && self.experiment_passed
    }
}

/// Write `results/run.log`, `results/summary.md` and (if the entry script did
/// not) `results/metrics.json`, then move emitted images into `results/plots`.
pub fn write_run_artifacts(project_dir: &Path, capture: &AttemptCapture<'_>) -> Result<RunResult> {
    let results_dir = project_dir.join(layout::RESULTS_DIR);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    let log_path = results_dir.join("run.log");
    let log = format!(
        "=== STDOUT ===\n{}\n\n=== STDERR ===\n{}\n",
        capture.combined_stdout, capture.combined_stderr
    );
    fs::write(&log_path, log).with_context(|| format!("write {}", log_path.display()))?;

    let key_metrics = flatten_key_metrics(capture.metrics);
    let summary_path = results_dir.join("summary.md");
    fs::write(&summary_path, render_summary(capture, &key_metrics))
        .with_context(|| format!("write {}", summary_path.display()))?;

    let metrics_path = project_dir.join(layout::METRICS);
    if !metrics_path.exists() {
        let mut buf =
            serde_json::to_string_pretty(capture.metrics).context("serialize metrics")?;
        buf.push('\n');
        fs::write(&metrics_path, buf)
            .with_context(|| format!("write {}", metrics_path.display()))?;
    }

    let plot_paths = collect_plots(project_dir, &results_dir.join("plots"))?;
    debug!(plots = plot_paths.len(), "wrote run artifacts");

    Ok(RunResult {
        success: capture.success(),
        tests_passed: capture.tests_passed,
        experiment_passed: capture.experiment_passed,
        metrics_path,
        summary_path,
        log_path,
        key_metrics,
        plot_paths,
    })
}

fn render_summary(capture: &AttemptCapture<'_>, key_metrics: &Map<String, Value>) -> String {
    let mut lines = vec![
        "# Run Summary".to_string(),
        String::new(),
        format!("- Success: {}", capture.success()),
        format!("- Tests Passed: {}", capture.tests_passed),
        format!("- Experiment Passed: {}", capture.experiment_passed),
        format!("- Metrics Count: {}", capture.metrics.len()),
        String::new(),
        "## Key Metrics".to_string(),
    ];
    if key_metrics.is_empty() {
        lines.push("- No scalar key metrics extracted.".to_string());
    } else {
        for (key, value) in key_metrics {
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            lines.push(format!("- {key}: {rendered}"));
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Move images from the project root into `plots_dir`; returns their new
/// paths sorted by name.
fn collect_plots(project_dir: &Path, plots_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(plots_dir)
        .with_context(|| format!("create plots dir {}", plots_dir.display()))?;

    let mut moved = Vec::new();
    let entries = fs::read_dir(project_dir)
        .with_context(|| format!("read project dir {}", project_dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", project_dir.display()))?;
        let path = entry.path();
        if !path.is_file() || !is_plot(&path) {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        let dest = plots_dir.join(name);
        fs::rename(&path, &dest)
            .with_context(|| format!("move plot {} to {}", path.display(), dest.display()))?;
        moved.push(dest);
    }
    moved.sort();
    Ok(moved)
}

fn is_plot(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PLOT_EXTENSIONS.contains(&ext))
}

/// Write the project report at `report.md`.
pub fn write_report(project_dir: &Path, report: &str) -> Result<PathBuf> {
    let path = project_dir.join(layout::REPORT);
    fs::write(&path, report).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metrics() -> Map<String, Value> {
        let Value::Object(map) = json!({"acc": 0.9, "final": {"loss": 0.1}, "curve": [1, 2]}) else {
            panic!("expected object");
        };
        map
    }

    #[test]
    fn writes_logs_summary_and_metrics() {
        let temp = tempfile::tempdir().expect("tempdir");
        let metrics = metrics();
        let capture = AttemptCapture {
            tests_passed: true,
            experiment_passed: false,
            combined_stdout: "$ python run\nout",
            combined_stderr: "$ python run\nboom",
            metrics: &metrics,
        };
        let result = write_run_artifacts(temp.path(), &capture).expect("artifacts");

        assert!(!result.success);
        assert!(result.tests_passed);
        let log = fs::read_to_string(&result.log_path).expect("log");
        assert!(log.starts_with("=== STDOUT ===\n$ python run\nout"));
        assert!(log.contains("=== STDERR ===\n$ python run\nboom"));

        let summary = fs::read_to_string(&result.summary_path).expect("summary");
        assert!(summary.contains("- Metrics Count: 3"));
        assert!(summary.contains("- final.loss: 0.1"));
        assert!(!summary.contains("curve"));

        let written: Value =
            serde_json::from_str(&fs::read_to_string(&result.metrics_path).expect("metrics"))
                .expect("json");
        assert_eq!(written["acc"], json!(0.9));
        assert_eq!(result.key_metrics.len(), 2);
    }

    #[test]
    fn keeps_metrics_written_by_entry_script() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("results")).expect("mkdir");
        fs::write(temp.path().join("results/metrics.json"), "{\"own\": 1}\n").expect("seed");
        let metrics = metrics();
        let capture = AttemptCapture {
            tests_passed: true,
            experiment_passed: true,
            combined_stdout: "",
            combined_stderr: "",
            metrics: &metrics,
        };
        let result = write_run_artifacts(temp.path(), &capture).expect("artifacts");
        let kept = fs::read_to_string(result.metrics_path).expect("metrics");
        assert_eq!(kept, "{\"own\": 1}\n");
    }

    #[test]
    fn moves_plots_sorted() {
        let temp = tempfile::tempdir().expect("tempdir");
        for name in ["b.png", "a.svg", "c.jpeg", "notes.txt"] {
            fs::write(temp.path().join(name), "x").expect("seed");
        }
        let metrics = Map::new();
        let capture = AttemptCapture {
            tests_passed: true,
            experiment_passed: true,
            combined_stdout: "",
            combined_stderr: "",
            metrics: &metrics,
        };
        let result = write_run_artifacts(temp.path(), &capture).expect("artifacts");
        let names: Vec<String> = result
            .plot_paths
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, vec!["a.svg", "b.png", "c.jpeg"]);
        assert!(temp.path().join("notes.txt").exists());
        assert!(!temp.path().join("b.png").exists());

        let summary = fs::read_to_string(result.summary_path).expect("summary");
        assert!(summary.contains("- No scalar key metrics extracted."));
    }
}
