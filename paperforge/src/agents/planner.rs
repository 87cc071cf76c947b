//! Planner stage: sections to implementation plan.

use tracing::warn;

use crate::core::structured::Structured;
use crate::core::types::{ImplementationPlan, RunRecord};
use crate::io::backend::{Generator, Role, generate_structured};
use crate::io::prompt::PromptBuilder;

const PLANNER_OUTPUT_SCHEMA: &str = include_str!("../../schemas/planner_output.schema.json");

#[derive(Debug, Clone)]
pub struct PlannerAgent {
    prompts: PromptBuilder,
}

impl PlannerAgent {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }

    pub fn run<G: Generator + ?Sized>(&self, generator: &G, record: &mut RunRecord) {
        let decoded = match self.prompts.planner(record) {
            Ok(prompt) => {
                generate_structured(generator, Role::Planner, prompt, PLANNER_OUTPUT_SCHEMA)
            }
            Err(err) => Structured::malformed(format!("{err:#}")),
        };
        record.implementation_plan = match decoded {
            Structured::Parsed(plan) => plan,
            Structured::Malformed { reason } => {
                warn!(%reason, "planner fell back to minimal plan");
                minimal_plan(record, &reason)
            }
        };
        record.status = "planned".to_string();
    }
}

fn minimal_plan(record: &RunRecord, reason: &str) -> ImplementationPlan {
    ImplementationPlan {
        overview: "Implement the paper's method in method.py behind run_experiment(config_path), \
                   returning a JSON-serializable metrics dictionary."
            .to_string(),
        files: vec!["method.py".to_string()],
        classes: Vec::new(),
        functions: vec!["run_experiment(config_path: str) -> dict".to_string()],
        libraries: record.parsed_sections.libraries.clone(),
        implementation_notes: format!("Planner produced no structured plan ({reason})."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGenerator;

    #[test]
    fn stores_structured_plan() {
        let generator = ScriptedGenerator::new().with_response(
            Role::Planner,
            r#"{"overview":"o","files":["method.py"],"classes":[],"functions":["f"],"libraries":["numpy"],"implementation_notes":"n"}"#,
        );
        let mut record = RunRecord::new("run-1", "small");
        PlannerAgent::new(10_000).run(&generator, &mut record);
        assert_eq!(record.implementation_plan.overview, "o");
        assert_eq!(record.status, "planned");
        assert!(generator.requests()[0].prompt.contains("small"));
    }

    #[test]
    fn missing_field_falls_back_to_minimal_plan() {
        let generator =
            ScriptedGenerator::new().with_response(Role::Planner, r#"{"overview":"o"}"#);
        let mut record = RunRecord::new("run-1", "");
        record.parsed_sections.libraries = vec!["scipy".to_string()];
        PlannerAgent::new(10_000).run(&generator, &mut record);
        assert_eq!(record.implementation_plan.files, vec!["method.py"]);
        assert_eq!(record.implementation_plan.libraries, vec!["scipy"]);
        assert!(
            record
                .implementation_plan
                .implementation_notes
                .contains("schema validation failed")
        );
    }
}
