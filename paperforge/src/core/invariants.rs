//! Run record invariants checked after every stage.

use crate::core::budget::Budgets;
use crate::core::routing::Stage;
use crate::core::types::RunRecord;

/// Check static invariants on a single record:
/// - `revision_count <= max_revisions`
/// - `review_iteration <= max(1, max_review_iterations)`
/// - `execution_error` is empty after a successful attempt
pub fn validate_record(record: &RunRecord, budgets: &Budgets) -> Vec<String> {
    let mut errors = Vec::new();
    if record.revision_count > budgets.max_revisions {
        errors.push(format!(
            "revision_count {} exceeds max_revisions {}",
            record.revision_count, budgets.max_revisions
        ));
    }
    let max_review = budgets.max_review_iterations.max(1);
    if record.review_iteration > max_review {
        errors.push(format!(
            "review_iteration {} exceeds max_review_iterations {}",
            record.review_iteration, max_review
        ));
    }
    if record.execution_success && !record.execution_error.is_empty() {
        errors.push("execution_error must be empty after a successful attempt".to_string());
    }
    errors
}

/// Check what a stage is allowed to change between `prev` and `next`.
///
/// `review_restart` marks the reviewer -> coder edge, the only place where the
/// repair budget and failure history may shrink.
pub fn validate_transition(
    stage: Stage,
    prev: &RunRecord,
    next: &RunRecord,
    review_restart: bool,
) -> Vec<String> {
    let mut errors = Vec::new();

    if stage != Stage::Parser && prev.parsed_sections != next.parsed_sections {
        errors.push(format!("{stage}: parsed_sections are read-only after parsing"));
    }
    if !matches!(stage, Stage::Parser | Stage::Planner)
        && prev.implementation_plan != next.implementation_plan
    {
        errors.push(format!(
            "{stage}: implementation_plan is read-only after planning"
        ));
    }
    if next.review_iteration < prev.review_iteration {
        errors.push(format!(
            "{stage}: review_iteration decreased from {} to {}",
            prev.review_iteration, next.review_iteration
        ));
    }

    if review_restart {
        return errors;
    }

    if next.revision_count < prev.revision_count {
        errors.push(format!(
            "{stage}: revision_count decreased from {} to {}",
            prev.revision_count, next.revision_count
        ));
    }
    let prefix_kept = next.error_history.len() >= prev.error_history.len()
        && next.error_history[..prev.error_history.len()] == prev.error_history[..];
    if !prefix_kept {
        errors.push(format!("{stage}: error_history is append-only"));
    }
    if stage == Stage::Debugger {
        if next.revision_count != prev.revision_count + 1 {
            errors.push(format!(
                "debugger: revision_count must advance by one (was {}, now {})",
                prev.revision_count, next.revision_count
            ));
        }
        if next.error_history.len() != prev.error_history.len() + 1 {
            errors.push("debugger: must append exactly one failure record".to_string());
        }
    }
    errors
}
