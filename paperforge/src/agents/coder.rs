//! Coder stage: plan to `method.py`.

use anyhow::{Context, Result, bail};
use tracing::{info, instrument};

use crate::core::structured::strip_code_fences;
use crate::core::types::RunRecord;
use crate::io::backend::{GenerationRequest, Generator, Role};
use crate::io::prompt::PromptBuilder;

#[derive(Debug, Clone)]
pub struct CoderAgent {
    prompts: PromptBuilder,
}

impl CoderAgent {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }

    /// Generate the implementation. Generation failures are fatal for the run
    /// and leave the record untouched.
    #[instrument(skip_all, fields(review_iteration = record.review_iteration, revision = record.revision_count))]
    pub fn run<G: Generator + ?Sized>(&self, generator: &G, record: &mut RunRecord) -> Result<()> {
        let request = GenerationRequest {
            role: Role::Coder,
            prompt: self.prompts.coder(record)?,
            output_schema: None,
        };
        let raw = generator.generate(&request).context("generate code")?;
        let code = strip_code_fences(&raw);
        if code.is_empty() {
            bail!("coder returned no code");
        }
        info!(chars = code.len(), "generated code");
        record.generated_code = format!("{code}\n");
        record.status = "coded".to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FailureRecord, RepairAction};
    use crate::test_support::ScriptedGenerator;

    #[test]
    fn strips_fences_from_code() {
        let generator = ScriptedGenerator::new()
            .with_response(Role::Coder, "```python\ndef run_experiment(p):\n    return {}\n```");
        let mut record = RunRecord::new("run-1", "");
        CoderAgent::new(10_000).run(&generator, &mut record).expect("code");
        assert_eq!(record.generated_code, "def run_experiment(p):\n    return {}\n");
        assert_eq!(record.status, "coded");
    }

    #[test]
    fn passes_recode_guidance() {
        let generator = ScriptedGenerator::new().with_response(Role::Coder, "x = 1");
        let mut record = RunRecord::new("run-1", "");
        record.debug_action = Some(RepairAction::Recode);
        record.error_history.push(FailureRecord {
            error: "boom".to_string(),
            analysis: "bad design".to_string(),
            action: RepairAction::Recode,
            guidance: Some("use closed-form solution".to_string()),
        });
        CoderAgent::new(10_000).run(&generator, &mut record).expect("code");
        assert!(generator.requests()[0].prompt.contains("use closed-form solution"));
    }

    #[test]
    fn generation_failure_is_fatal_and_keeps_record() {
        let generator = ScriptedGenerator::new();
        let mut record = RunRecord::new("run-1", "");
        record.generated_code = "old".to_string();
        let err = CoderAgent::new(10_000)
            .run(&generator, &mut record)
            .unwrap_err();
        assert!(format!("{err:#}").contains("generate code"));
        assert_eq!(record.generated_code, "old");
    }

    #[test]
    fn empty_code_is_error() {
        let generator = ScriptedGenerator::new().with_response(Role::Coder, "```\n\n```");
        let mut record = RunRecord::new("run-1", "");
        assert!(CoderAgent::new(10_000).run(&generator, &mut record).is_err());
    }
}
