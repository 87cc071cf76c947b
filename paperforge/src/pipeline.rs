//! Pipeline driver: runs stages over the routing graph until it ends.
//!
//! The driver owns the run record. After every stage it checks the record
//! invariants, writes the stage log and hands the stage to `on_stage`.
//! Routing itself is pure and lives in [`crate::core::routing`].

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::agents::coder::CoderAgent;
use crate::agents::debugger::DebuggerAgent;
use crate::agents::executor::{ExecutorAgent, ExecutorSettings};
use crate::agents::parser::ParserAgent;
use crate::agents::planner::PlannerAgent;
use crate::agents::reviewer::ReviewerAgent;
use crate::core::budget::Budgets;
use crate::core::invariants::{validate_record, validate_transition};
use crate::core::routing::{Route, Stage, next_stage};
use crate::core::types::RunRecord;
use crate::io::backend::Generator;
use crate::io::config::PipelineConfig;
use crate::io::project::RunPaths;
use crate::io::publish::{Publisher, repo_name_for};
use crate::io::sandbox::CommandRunner;
use crate::io::stage_log::{StageMeta, write_stage};

/// Budgets and stage settings for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub budgets: Budgets,
    pub prompt_budget_bytes: usize,
    pub document_char_limit: usize,
    pub executor: ExecutorSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            budgets: config.budgets(),
            prompt_budget_bytes: config.prompt_budget_bytes,
            document_char_limit: config.document_char_limit,
            executor: ExecutorSettings {
                python: config.python.clone(),
                probe_timeout: config.probe_timeout(),
                install_timeout: config.install_timeout(),
                test_timeout: config.test_timeout(),
                run_timeout: config.run_timeout(),
            },
        }
    }
}

/// A finished stage, as reported to the `on_stage` callback.
#[derive(Debug)]
pub struct StageEvent<'a> {
    pub seq: u64,
    pub stage: Stage,
    /// `None` when the run ended after this stage.
    pub next: Option<Stage>,
    pub record: &'a RunRecord,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub record: RunRecord,
    pub stages_executed: u64,
    pub trace: Vec<Stage>,
}

pub struct Pipeline<'a, G: Generator + ?Sized, R: CommandRunner> {
    generator: &'a G,
    runner: &'a R,
    publisher: Option<&'a dyn Publisher>,
    budgets: Budgets,
    parser: ParserAgent,
    planner: PlannerAgent,
    coder: CoderAgent,
    executor: ExecutorAgent,
    debugger: DebuggerAgent,
    reviewer: ReviewerAgent,
}

impl<'a, G: Generator + ?Sized, R: CommandRunner> Pipeline<'a, G, R> {
    pub fn new(generator: &'a G, runner: &'a R, settings: PipelineSettings) -> Self {
        let budget = settings.prompt_budget_bytes;
        Self {
            generator,
            runner,
            publisher: None,
            budgets: settings.budgets,
            parser: ParserAgent::new(budget, settings.document_char_limit),
            planner: PlannerAgent::new(budget),
            coder: CoderAgent::new(budget),
            executor: ExecutorAgent::new(settings.executor),
            debugger: DebuggerAgent::new(budget),
            reviewer: ReviewerAgent::new(budget),
        }
    }

    /// Route the finished run to `publisher`. Without one the run ends after review.
    pub fn with_publisher(mut self, publisher: &'a dyn Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Drive `record` from [`Stage::ENTRY`] to the end of the graph.
    ///
    /// Errors from the coder, from the filesystem, and invariant violations abort
    /// the run. The last committed record stays in `record.json`.
    #[instrument(skip_all, fields(run_id = %record.run_id))]
    pub fn run<F>(
        &self,
        paths: &RunPaths,
        paper_text: Option<&str>,
        mut record: RunRecord,
        mut on_stage: F,
    ) -> Result<PipelineOutcome>
    where
        F: FnMut(&StageEvent<'_>),
    {
        let publish = self.publisher.is_some();
        let limit = self.budgets.max_stage_invocations();
        let mut trace = Vec::new();
        let mut stages_executed = 0u64;
        let mut attempt_seq = 0u32;
        let mut review_restart = false;
        let mut stage = Stage::ENTRY;

        loop {
            if stages_executed >= limit {
                bail!("stage limit {limit} reached before {stage}; routing did not terminate");
            }
            let prev = record.clone();
            if review_restart {
                record.restart_for_review();
                info!(
                    review_iteration = record.review_iteration,
                    requirements = record.review_requirements.len(),
                    "restarting coding attempt after review"
                );
            }

            let started_at = Utc::now();
            match stage {
                Stage::Parser => self.parser.run(self.generator, paper_text, &mut record),
                Stage::Planner => self.planner.run(self.generator, &mut record),
                Stage::Coder => self
                    .coder
                    .run(self.generator, &mut record)
                    .context("coder stage")?,
                Stage::Executor => {
                    attempt_seq += 1;
                    self.executor
                        .run(self.runner, paths, attempt_seq, &mut record)
                        .context("executor stage")?;
                }
                Stage::Debugger => self.debugger.run(self.generator, &mut record),
                Stage::Reviewer => self.reviewer.run(self.generator, &mut record),
                Stage::Publisher => self.publish(&mut record),
            }
            let ended_at = Utc::now();

            let mut violations = validate_transition(stage, &prev, &record, review_restart);
            violations.extend(validate_record(&record, &self.budgets));
            if !violations.is_empty() {
                bail!(
                    "run record invariant violations after {stage}:\n- {}",
                    violations.join("\n- ")
                );
            }

            stages_executed += 1;
            trace.push(stage);
            let next = match next_stage(stage, &record, &self.budgets, publish) {
                Route::Next(next) => Some(next),
                Route::End => None,
            };
            review_restart = stage == Stage::Reviewer && next == Some(Stage::Coder);
            info!(
                seq = stages_executed,
                %stage,
                next = next.map_or("end", Stage::as_str),
                status = %record.status,
                "stage finished"
            );

            let meta = StageMeta::new(stages_executed, stage, next, &record, started_at, ended_at);
            write_stage(paths, &meta, &record)?;
            on_stage(&StageEvent {
                seq: stages_executed,
                stage,
                next,
                record: &record,
            });

            match next {
                Some(next) => stage = next,
                None => break,
            }
        }

        Ok(PipelineOutcome {
            record,
            stages_executed,
            trace,
        })
    }

    fn publish(&self, record: &mut RunRecord) {
        let Some(publisher) = self.publisher else {
            record.publish_error = Some("no publisher configured".to_string());
            record.status = "publish skipped".to_string();
            return;
        };
        let Some(project_dir) = record.output_repo_path.clone() else {
            record.publish_error = Some("no materialized project to publish".to_string());
            record.status = "publish failed".to_string();
            return;
        };
        match publisher.publish(&project_dir, &repo_name_for(&record.run_id)) {
            Ok(publication) => {
                record.publication = Some(publication);
                record.publish_error = None;
                record.status = "published".to_string();
            }
            Err(err) => {
                warn!(err = ?err, "publish failed");
                record.publish_error = Some(format!("{err:#}"));
                record.status = "publish failed".to_string();
            }
        }
    }
}
