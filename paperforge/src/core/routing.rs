//! Pipeline state graph and pure routing functions.
//!
//! ```text
//! parser -> planner -> coder -> executor -> {debugger | reviewer}
//! debugger -> {coder | executor | reviewer}
//! reviewer -> {coder | publisher | end}
//! publisher -> end
//! ```
//!
//! Routing only reads the run record. State changes that belong to an edge (the
//! review restart) are applied by the driver in [`crate::pipeline`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::budget::Budgets;
use crate::core::types::{RepairAction, RunRecord, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parser,
    Planner,
    Coder,
    Executor,
    Debugger,
    Reviewer,
    Publisher,
}

impl Stage {
    pub const ENTRY: Stage = Stage::Parser;

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Parser => "parser",
            Stage::Planner => "planner",
            Stage::Coder => "coder",
            Stage::Executor => "executor",
            Stage::Debugger => "debugger",
            Stage::Reviewer => "reviewer",
            Stage::Publisher => "publisher",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the pipeline goes after a stage completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Next(Stage),
    End,
}

pub fn route_after_executor(record: &RunRecord, budgets: &Budgets) -> Stage {
    if record.execution_success || budgets.revisions_exhausted(record.revision_count) {
        return Stage::Reviewer;
    }
    Stage::Debugger
}

pub fn route_after_debugger(record: &RunRecord, budgets: &Budgets) -> Stage {
    if budgets.revisions_exhausted(record.revision_count) {
        return Stage::Reviewer;
    }
    match record.debug_action {
        Some(RepairAction::Recode) => Stage::Coder,
        Some(RepairAction::Patch) | None => Stage::Executor,
    }
}

/// Review routing. `Stage::Coder` here means the driver must apply
/// [`RunRecord::restart_for_review`] before the coder runs.
pub fn route_after_reviewer(record: &RunRecord, budgets: &Budgets, publish: bool) -> Route {
    let complete = record.verdict() == Some(Verdict::Complete);
    if !complete && budgets.review_iterations_remaining(record.review_iteration) {
        return Route::Next(Stage::Coder);
    }
    finish(publish)
}

fn finish(publish: bool) -> Route {
    if publish {
        Route::Next(Stage::Publisher)
    } else {
        Route::End
    }
}

/// Full transition function over the state graph.
pub fn next_stage(current: Stage, record: &RunRecord, budgets: &Budgets, publish: bool) -> Route {
    match current {
        Stage::Parser => Route::Next(Stage::Planner),
        Stage::Planner => Route::Next(Stage::Coder),
        Stage::Coder => Route::Next(Stage::Executor),
        Stage::Executor => Route::Next(route_after_executor(record, budgets)),
        Stage::Debugger => Route::Next(route_after_debugger(record, budgets)),
        Stage::Reviewer => route_after_reviewer(record, budgets, publish),
        Stage::Publisher => Route::End,
    }
}
