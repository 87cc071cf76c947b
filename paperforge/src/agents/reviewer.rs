//! Reviewer stage: verdict on the last attempt.

use tracing::{info, warn};

use crate::core::structured::Structured;
use crate::core::types::{ReviewFeedback, RunRecord, Verdict};
use crate::io::backend::{Generator, Role, generate_structured};
use crate::io::prompt::PromptBuilder;

const REVIEWER_OUTPUT_SCHEMA: &str = include_str!("../../schemas/reviewer_output.schema.json");

#[derive(Debug, Clone)]
pub struct ReviewerAgent {
    prompts: PromptBuilder,
}

impl ReviewerAgent {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }

    /// Store the review and count the pass.
    ///
    /// Without a usable response the verdict follows the execution result.
    pub fn run<G: Generator + ?Sized>(&self, generator: &G, record: &mut RunRecord) {
        let decoded = match self.prompts.reviewer(record) {
            Ok(prompt) => {
                generate_structured(generator, Role::Reviewer, prompt, REVIEWER_OUTPUT_SCHEMA)
            }
            Err(err) => Structured::malformed(format!("{err:#}")),
        };
        let feedback = match decoded {
            Structured::Parsed(feedback) => feedback,
            Structured::Malformed { reason } => {
                warn!(%reason, "reviewer fell back to execution verdict");
                fallback_feedback(record.execution_success)
            }
        };
        info!(verdict = ?feedback.verdict, "review finished");
        record.review_feedback = Some(feedback);
        record.review_iteration += 1;
        record.status = "review complete".to_string();
    }
}

fn fallback_feedback(execution_success: bool) -> ReviewFeedback {
    let (verdict, summary) = if execution_success {
        (
            Verdict::Complete,
            "Reviewer returned no structured output; the implementation ran successfully.",
        )
    } else {
        (
            Verdict::Incomplete,
            "Reviewer returned no structured output; the implementation did not run successfully.",
        )
    };
    ReviewFeedback {
        verdict,
        summary: summary.to_string(),
        missing: Vec::new(),
        suggestions: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGenerator;

    #[test]
    fn stores_feedback_and_increments_iteration() {
        let generator = ScriptedGenerator::new().with_response(
            Role::Reviewer,
            r#"{"verdict":"partial","summary":"s","missing":["ablation"],"suggestions":["plots"]}"#,
        );
        let mut record = RunRecord::new("run-1", "");
        ReviewerAgent::new(10_000).run(&generator, &mut record);

        assert_eq!(record.verdict(), Some(Verdict::Partial));
        assert_eq!(record.review_iteration, 1);
        assert_eq!(record.status, "review complete");
    }

    #[test]
    fn fallback_follows_execution_success() {
        let generator = ScriptedGenerator::new();
        let mut record = RunRecord::new("run-1", "");
        record.execution_success = true;
        ReviewerAgent::new(10_000).run(&generator, &mut record);
        assert_eq!(record.verdict(), Some(Verdict::Complete));

        let mut failed = RunRecord::new("run-2", "");
        ReviewerAgent::new(10_000).run(&generator, &mut failed);
        assert_eq!(failed.verdict(), Some(Verdict::Incomplete));
        assert_eq!(failed.review_iteration, 1);
    }
}
