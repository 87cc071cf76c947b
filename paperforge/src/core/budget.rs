//! Retry budgets for the repair and review loops.

use serde::{Deserialize, Serialize};

/// Repair cycles allowed within one coding attempt.
pub const MAX_REVISIONS: u32 = 3;
/// Reviewer passes allowed per run.
pub const MAX_REVIEW_ITERATIONS: u32 = 2;

/// Stages that run exactly once per pipeline invocation (parser, planner).
const FIXED_STAGES: u64 = 2;
/// Coder, executor and reviewer run once per review iteration.
const PER_ITERATION_STAGES: u64 = 3;
/// Worst case per revision: debugger, coder (recode), executor.
const PER_REVISION_STAGES: u64 = 3;
/// Publisher runs at most once.
const TERMINAL_STAGES: u64 = 1;

/// The two nested retry budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budgets {
    pub max_revisions: u32,
    pub max_review_iterations: u32,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_revisions: MAX_REVISIONS,
            max_review_iterations: MAX_REVIEW_ITERATIONS,
        }
    }
}

impl Budgets {
    pub fn revisions_exhausted(&self, revision_count: u32) -> bool {
        revision_count >= self.max_revisions
    }

    pub fn review_iterations_remaining(&self, review_iteration: u32) -> bool {
        review_iteration < self.max_review_iterations
    }

    /// Upper bound on stage invocations for one pipeline run.
    ///
    /// The reviewer always runs at least once, so a zero review budget still
    /// costs one full iteration.
    pub fn max_stage_invocations(&self) -> u64 {
        let iterations = u64::from(self.max_review_iterations.max(1));
        let revisions = u64::from(self.max_revisions);
        FIXED_STAGES
            + iterations * (PER_ITERATION_STAGES + PER_REVISION_STAGES * revisions)
            + TERMINAL_STAGES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bound_matches_nested_loops() {
        let budgets = Budgets::default();
        // 2 + 2 * (3 + 3 * 3) + 1
        assert_eq!(budgets.max_stage_invocations(), 27);
    }

    #[test]
    fn zero_review_budget_still_counts_one_iteration() {
        let budgets = Budgets {
            max_revisions: 0,
            max_review_iterations: 0,
        };
        assert_eq!(budgets.max_stage_invocations(), 6);
    }

    #[test]
    fn exhaustion_checks_are_inclusive_bounds() {
        let budgets = Budgets::default();
        assert!(!budgets.revisions_exhausted(2));
        assert!(budgets.revisions_exhausted(3));
        assert!(budgets.review_iterations_remaining(1));
        assert!(!budgets.review_iterations_remaining(2));
    }
}
