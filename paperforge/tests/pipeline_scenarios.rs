//! End-to-end pipeline scenarios with a scripted generator and sandbox.
//!
//! Each test drives `Pipeline::run` over a temp output directory and checks
//! the final record, the stage trace and the materialized attempts.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fs;
use std::time::Duration;

use paperforge::core::budget::{Budgets, MAX_REVISIONS};
use paperforge::core::config_keys::BASELINE_KEYS;
use paperforge::core::routing::Stage;
use paperforge::core::types::{RepairAction, RunRecord, Verdict};
use paperforge::io::backend::Role;
use paperforge::io::document::DocumentSource;
use paperforge::io::project::RunPaths;
use paperforge::pipeline::{Pipeline, PipelineSettings};
use paperforge::test_support::{
    PLAN_JSON, SIMPLE_CODE, ScriptedGenerator, ScriptedRunner, StaticDocument, failed, is_entry,
    patch_json, recode_json, record_with_sections, review_json, succeeded, timed_out,
};

const PARSER_JSON: &str = r#"{"abstract":"Consensus over rings.","methodology":"Each agent averages with its neighbours.","algorithms":["average"],"libraries":null}"#;

const RAISING_CODE: &str = "def run_experiment(config_path):\n    raise ValueError('bad shape')\n";

fn yaml_keys(yaml: &str) -> BTreeSet<String> {
    yaml.lines()
        .filter_map(|line| line.split(':').next())
        .map(str::to_string)
        .collect()
}

/// Entry script fails on its first `failures` runs, then succeeds.
fn entry_fails_first(failures: u32, stderr: &'static str) -> ScriptedRunner {
    let entry_runs = Cell::new(0u32);
    ScriptedRunner::new(move |command, _| {
        if !is_entry(command) {
            return succeeded("");
        }
        entry_runs.set(entry_runs.get() + 1);
        if entry_runs.get() <= failures {
            failed(stderr)
        } else {
            succeeded("{\"score\": 0.93, \"detail\": {\"rounds\": 12}}\n")
        }
    })
}

#[test]
fn scenario_a_clean_code_runs_first_time() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = RunPaths::new(temp.path(), "run-a");
    let paper = StaticDocument("Decentralized consensus over rings.".to_string())
        .extract()
        .expect("paper text");
    let generator = ScriptedGenerator::new()
        .with_response(Role::Parser, PARSER_JSON)
        .with_response(Role::Planner, PLAN_JSON)
        .with_response(Role::Coder, format!("```python\n{SIMPLE_CODE}```"))
        .with_response(Role::Reviewer, review_json("complete", &[], &[]));
    let runner = entry_fails_first(0, "");

    let outcome = Pipeline::new(&generator, &runner, PipelineSettings::default())
        .run(&paths, Some(&paper), RunRecord::new("run-a", ""), |_| {})
        .expect("pipeline");

    let record = outcome.record;
    assert_eq!(
        record.parsed_sections.methodology.as_deref(),
        Some("Each agent averages with its neighbours.")
    );
    assert!(record.execution_success);
    assert!(record.execution_error.is_empty());
    assert_eq!(record.revision_count, 0);
    assert_eq!(record.observed_metrics["score"], serde_json::json!(0.93));

    let result = record.run_result.expect("run result");
    assert!(result.tests_passed);
    assert!(result.experiment_passed);
    assert_eq!(result.key_metrics["detail.rounds"], serde_json::json!(12));

    let project = record.output_repo_path.expect("project");
    assert_eq!(
        fs::read_to_string(project.join("method.py")).expect("method.py"),
        SIMPLE_CODE
    );
    let default = fs::read_to_string(project.join("configs/default.yaml")).expect("default");
    let expected: BTreeSet<String> = BASELINE_KEYS.iter().map(|key| key.to_string()).collect();
    assert_eq!(yaml_keys(&default), expected);
    let ablation = fs::read_to_string(project.join("configs/ablation.yaml")).expect("ablation");
    assert_eq!(yaml_keys(&ablation), expected);
    assert_ne!(default, ablation);

    assert_eq!(
        outcome.trace,
        vec![
            Stage::Parser,
            Stage::Planner,
            Stage::Coder,
            Stage::Executor,
            Stage::Reviewer
        ]
    );
}

#[test]
fn scenario_b_patch_repairs_failing_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = RunPaths::new(temp.path(), "run-b");
    let generator = ScriptedGenerator::new()
        .with_response(Role::Planner, PLAN_JSON)
        .with_response(Role::Coder, RAISING_CODE)
        .with_response(
            Role::Debugger,
            patch_json("run_experiment raises unconditionally", SIMPLE_CODE),
        )
        .with_response(Role::Reviewer, review_json("complete", &[], &[]));
    let runner = entry_fails_first(1, "Traceback (most recent call last):\nValueError: bad shape");

    let outcome = Pipeline::new(&generator, &runner, PipelineSettings::default())
        .run(&paths, None, record_with_sections("run-b"), |_| {})
        .expect("pipeline");

    let record = &outcome.record;
    assert!(record.execution_success);
    assert_eq!(record.revision_count, 1);
    assert_eq!(record.error_history.len(), 1);
    let failure = &record.error_history[0];
    assert_eq!(failure.action, RepairAction::Patch);
    assert!(failure.error.contains("ValueError: bad shape"));
    assert!(failure.guidance.is_none());
    assert_eq!(record.generated_code, SIMPLE_CODE);

    let debugger_prompt = &generator.requests_for(Role::Debugger)[0].prompt;
    assert!(debugger_prompt.contains("raise ValueError('bad shape')"));
    assert!(debugger_prompt.contains("ValueError: bad shape"));

    assert_eq!(
        outcome.trace,
        vec![
            Stage::Parser,
            Stage::Planner,
            Stage::Coder,
            Stage::Executor,
            Stage::Debugger,
            Stage::Executor,
            Stage::Reviewer
        ]
    );
    let attempts: Vec<String> = fs::read_dir(&paths.attempts_dir)
        .expect("attempts dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    assert_eq!(attempts, vec!["attempt-01-i0-r0", "attempt-02-i0-r1"]);
}

#[test]
fn recode_regenerates_with_guidance() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = RunPaths::new(temp.path(), "run-r");
    let generator = ScriptedGenerator::new()
        .with_response(Role::Planner, PLAN_JSON)
        .with_response(Role::Coder, RAISING_CODE)
        .with_response(Role::Coder, SIMPLE_CODE)
        .with_response(
            Role::Debugger,
            recode_json(
                "iterative solver never converges",
                "use a closed-form update",
            ),
        )
        .with_response(Role::Reviewer, review_json("complete", &[], &[]));
    let runner = entry_fails_first(1, "RuntimeError: solver diverged");

    let outcome = Pipeline::new(&generator, &runner, PipelineSettings::default())
        .run(&paths, None, record_with_sections("run-r"), |_| {})
        .expect("pipeline");

    assert_eq!(
        outcome.trace,
        vec![
            Stage::Parser,
            Stage::Planner,
            Stage::Coder,
            Stage::Executor,
            Stage::Debugger,
            Stage::Coder,
            Stage::Executor,
            Stage::Reviewer
        ]
    );
    let record = &outcome.record;
    assert!(record.execution_success);
    assert_eq!(record.revision_count, 1);
    assert_eq!(record.generated_code, SIMPLE_CODE);
    let failure = &record.error_history[0];
    assert_eq!(failure.action, RepairAction::Recode);
    assert_eq!(failure.guidance.as_deref(), Some("use a closed-form update"));
    assert!(failure.error.contains("RuntimeError: solver diverged"));

    let coder_prompts = generator.requests_for(Role::Coder);
    assert_eq!(coder_prompts.len(), 2);
    assert!(!coder_prompts[0].prompt.contains("use a closed-form update"));
    assert!(coder_prompts[1].prompt.contains("use a closed-form update"));
}

#[test]
fn scenario_c_timeouts_exhaust_repairs_and_reach_review() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = RunPaths::new(temp.path(), "run-c");
    let generator = ScriptedGenerator::new()
        .with_response(Role::Planner, PLAN_JSON)
        .with_response(Role::Reviewer, review_json("incomplete", &[], &[]))
        .with_response(Role::Reviewer, review_json("incomplete", &[], &[]));
    for _ in 0..(2 * MAX_REVISIONS) {
        generator.push_response(Role::Coder, "def run_experiment(config_path):\n    while True:\n        pass\n");
    }
    let runner = ScriptedRunner::new(|command, _| {
        if is_entry(command) {
            timed_out(command, Duration::from_secs(60))
        } else {
            succeeded("")
        }
    });
    let first_review = RefCell::new(None);

    let outcome = Pipeline::new(&generator, &runner, PipelineSettings::default())
        .run(&paths, None, record_with_sections("run-c"), |event| {
            if event.stage == Stage::Reviewer && first_review.borrow().is_none() {
                *first_review.borrow_mut() = Some(event.record.clone());
            }
        })
        .expect("pipeline");

    let at_review = first_review.into_inner().expect("reviewer reached");
    assert_eq!(at_review.revision_count, MAX_REVISIONS);
    assert!(!at_review.execution_success);
    assert_eq!(at_review.error_history.len(), MAX_REVISIONS as usize);
    for failure in &at_review.error_history {
        assert_eq!(failure.action, RepairAction::Recode);
        assert!(failure.error.contains("Command timed out after 60s: python3 run_experiment.py"));
    }

    // Debugger had no structured output, so each recode carried fallback guidance.
    let coder_prompts = generator.requests_for(Role::Coder);
    assert!(coder_prompts[1].prompt.contains("avoids infinite loops"));

    let record = &outcome.record;
    assert!(!record.execution_success);
    assert_eq!(record.review_iteration, 2);
    assert_eq!(record.verdict(), Some(Verdict::Incomplete));
    assert_eq!(runner.entry_runs(), 2 * MAX_REVISIONS as usize);
    assert_eq!(outcome.trace.last(), Some(&Stage::Reviewer));
}

#[test]
fn scenario_d_partial_review_restarts_coding() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = RunPaths::new(temp.path(), "run-d");
    let generator = ScriptedGenerator::new()
        .with_response(Role::Planner, PLAN_JSON)
        .with_response(Role::Coder, RAISING_CODE)
        .with_response(Role::Debugger, patch_json("raises", SIMPLE_CODE))
        .with_response(
            Role::Reviewer,
            review_json("partial", &["ablation study"], &["plot convergence"]),
        )
        .with_response(Role::Coder, SIMPLE_CODE)
        .with_response(Role::Reviewer, review_json("complete", &[], &[]));
    let runner = entry_fails_first(1, "ValueError: bad shape");
    let restarted = RefCell::new(None);

    let outcome = Pipeline::new(&generator, &runner, PipelineSettings::default())
        .run(&paths, None, record_with_sections("run-d"), |event| {
            if event.stage == Stage::Reviewer && event.next == Some(Stage::Coder) {
                assert_eq!(event.record.revision_count, 1);
                assert_eq!(event.record.error_history.len(), 1);
            }
            if event.stage == Stage::Coder && event.record.review_iteration == 1 {
                *restarted.borrow_mut() = Some(event.record.clone());
            }
        })
        .expect("pipeline");

    let restarted = restarted.into_inner().expect("second coding attempt");
    assert_eq!(restarted.revision_count, 0);
    assert!(restarted.error_history.is_empty());
    assert_eq!(
        restarted.review_requirements,
        vec!["ablation study".to_string(), "plot convergence".to_string()]
    );
    assert!(generator.requests_for(Role::Coder)[1].prompt.contains("ablation study"));

    let record = &outcome.record;
    assert_eq!(record.review_iteration, 2);
    assert_eq!(record.verdict(), Some(Verdict::Complete));
    assert!(record.execution_success);
    assert!(
        record
            .output_repo_path
            .as_ref()
            .expect("project")
            .ends_with("attempts/attempt-03-i1-r0")
    );
}

#[test]
fn stage_count_stays_within_bound() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = RunPaths::new(temp.path(), "run-bound");
    // Only the coder answers; every other role falls back.
    let generator = ScriptedGenerator::new();
    for _ in 0..(2 * MAX_REVISIONS) {
        generator.push_response(Role::Coder, RAISING_CODE);
    }
    let runner = ScriptedRunner::new(|_, _| failed("exit status 1"));
    let settings = PipelineSettings::default();
    let bound = settings.budgets.max_stage_invocations();

    let outcome = Pipeline::new(&generator, &runner, settings)
        .run(&paths, None, record_with_sections("run-bound"), |_| {})
        .expect("pipeline");

    assert!(outcome.stages_executed <= bound);
    assert_eq!(outcome.stages_executed, 22);
    assert_eq!(outcome.record.review_iteration, 2);
    assert_eq!(outcome.record.verdict(), Some(Verdict::Incomplete));
    let logs = fs::read_dir(&paths.stages_dir).expect("stages").count();
    assert_eq!(logs as u64, outcome.stages_executed);
}

#[test]
fn zero_budgets_still_review_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = RunPaths::new(temp.path(), "run-zero");
    let generator = ScriptedGenerator::new()
        .with_response(Role::Planner, PLAN_JSON)
        .with_response(Role::Coder, RAISING_CODE);
    let runner = entry_fails_first(u32::MAX, "ValueError");
    let settings = PipelineSettings {
        budgets: Budgets {
            max_revisions: 0,
            max_review_iterations: 0,
        },
        ..PipelineSettings::default()
    };

    let outcome = Pipeline::new(&generator, &runner, settings)
        .run(&paths, None, record_with_sections("run-zero"), |_| {})
        .expect("pipeline");

    assert_eq!(
        outcome.trace,
        vec![
            Stage::Parser,
            Stage::Planner,
            Stage::Coder,
            Stage::Executor,
            Stage::Reviewer
        ]
    );
    assert_eq!(outcome.record.revision_count, 0);
    assert_eq!(outcome.record.review_iteration, 1);
    assert!(!outcome.record.execution_success);
    assert!(!outcome.record.report_markdown.is_empty());
}
