//! Debugger stage: one repair decision per failed attempt.
//!
//! Every call appends exactly one [`FailureRecord`] and increments
//! `revision_count` by one, whether the decision came from the model or from
//! the fallback.

use tracing::{info, instrument, warn};

use crate::core::structured::{Structured, strip_code_fences};
use crate::core::types::{DebugDecision, FailureRecord, RepairAction, RunRecord};
use crate::io::backend::{Generator, Role, generate_structured};
use crate::io::prompt::PromptBuilder;

const DEBUGGER_OUTPUT_SCHEMA: &str = include_str!("../../schemas/debugger_output.schema.json");

pub const FALLBACK_ANALYSIS: &str =
    "Debugger model returned no structured output; falling back to recode.";
pub const FALLBACK_GUIDANCE: &str = "Produce a simpler, bounded implementation that avoids \
     infinite loops and ensures run_experiment(config_path) returns quickly with \
     JSON-serializable metrics.";

#[derive(Debug, Clone)]
pub struct DebuggerAgent {
    prompts: PromptBuilder,
}

impl DebuggerAgent {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }

    #[instrument(skip_all, fields(revision = record.revision_count))]
    pub fn run<G: Generator + ?Sized>(&self, generator: &G, record: &mut RunRecord) {
        let decoded = match self.prompts.debugger(record) {
            Ok(prompt) => {
                generate_structured(generator, Role::Debugger, prompt, DEBUGGER_OUTPUT_SCHEMA)
            }
            Err(err) => Structured::malformed(format!("{err:#}")),
        };
        let decision = match decoded {
            Structured::Parsed(decision) => usable(decision),
            Structured::Malformed { reason } => {
                warn!(%reason, "debugger fell back to recode");
                None
            }
        }
        .unwrap_or_else(fallback_decision);
        apply_decision(record, decision);
    }
}

/// A patch without code cannot make progress; treat it as no decision.
fn usable(decision: DebugDecision) -> Option<DebugDecision> {
    if decision.action == RepairAction::Patch && strip_code_fences(&decision.output).is_empty() {
        warn!("debugger returned an empty patch");
        return None;
    }
    Some(decision)
}

pub fn fallback_decision() -> DebugDecision {
    DebugDecision {
        analysis: FALLBACK_ANALYSIS.to_string(),
        action: RepairAction::Recode,
        output: FALLBACK_GUIDANCE.to_string(),
    }
}

/// Record `decision` against the current failure.
pub fn apply_decision(record: &mut RunRecord, decision: DebugDecision) {
    let DebugDecision {
        analysis,
        action,
        output,
    } = decision;
    info!(action = action.as_str(), "repair decision");

    let guidance = match action {
        RepairAction::Patch => {
            record.generated_code = format!("{}\n", strip_code_fences(&output));
            record.status = "debugged".to_string();
            None
        }
        RepairAction::Recode => {
            record.status = "recode requested".to_string();
            Some(output)
        }
    };
    record.error_history.push(FailureRecord {
        error: record.execution_error.clone(),
        analysis,
        action,
        guidance,
    });
    record.revision_count += 1;
    record.debug_action = Some(action);
}
