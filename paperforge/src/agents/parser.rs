//! Parser stage: paper text to structured sections.

use tracing::{info, warn};

use crate::core::materialize::truncate_chars;
use crate::core::structured::Structured;
use crate::core::types::{ParsedSections, RunRecord};
use crate::io::backend::{Generator, Role, generate_structured};
use crate::io::prompt::PromptBuilder;

const PARSER_OUTPUT_SCHEMA: &str = include_str!("../../schemas/parser_output.schema.json");

#[derive(Debug, Clone)]
pub struct ParserAgent {
    prompts: PromptBuilder,
    document_char_limit: usize,
}

impl ParserAgent {
    pub fn new(prompt_budget_bytes: usize, document_char_limit: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
            document_char_limit,
        }
    }

    /// Populate `parsed_sections` from `paper_text`.
    ///
    /// Sections supplied by the caller are kept as they are. A malformed
    /// response falls back to the raw text as the methodology.
    pub fn run<G: Generator + ?Sized>(
        &self,
        generator: &G,
        paper_text: Option<&str>,
        record: &mut RunRecord,
    ) {
        record.status = "parsed".to_string();
        if !record.parsed_sections.is_empty() {
            info!("using provided sections");
            return;
        }
        let Some(text) = paper_text.map(str::trim).filter(|t| !t.is_empty()) else {
            warn!("no paper text and no provided sections");
            return;
        };
        let excerpt = truncate_chars(text, self.document_char_limit);

        let decoded = match self.prompts.parser(excerpt) {
            Ok(prompt) => generate_structured(generator, Role::Parser, prompt, PARSER_OUTPUT_SCHEMA),
            Err(err) => Structured::malformed(format!("{err:#}")),
        };
        record.parsed_sections = match decoded {
            Structured::Parsed(sections) => sections,
            Structured::Malformed { reason } => {
                warn!(%reason, "parser fell back to raw text");
                raw_text_sections(excerpt)
            }
        };
    }
}

fn raw_text_sections(text: &str) -> ParsedSections {
    ParsedSections {
        abstract_text: None,
        methodology: Some(text.to_string()),
        algorithms: Vec::new(),
        libraries: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGenerator;

    #[test]
    fn parses_structured_sections() {
        let generator = ScriptedGenerator::new().with_response(
            Role::Parser,
            r#"{"abstract":"A","methodology":"M","algorithms":null,"libraries":["numpy"]}"#,
        );
        let mut record = RunRecord::new("run-1", "");
        ParserAgent::new(10_000, 100).run(&generator, Some("paper text"), &mut record);

        assert_eq!(record.parsed_sections.abstract_text.as_deref(), Some("A"));
        assert!(record.parsed_sections.algorithms.is_empty());
        assert_eq!(record.parsed_sections.libraries, vec!["numpy"]);
        assert_eq!(record.status, "parsed");
    }

    #[test]
    fn malformed_response_falls_back_to_raw_text() {
        let generator = ScriptedGenerator::new().with_response(Role::Parser, "Sure! Here you go");
        let mut record = RunRecord::new("run-1", "");
        ParserAgent::new(10_000, 5).run(&generator, Some("abcdefgh"), &mut record);
        assert_eq!(record.parsed_sections.methodology.as_deref(), Some("abcde"));
    }

    #[test]
    fn provided_sections_skip_generation() {
        let generator = ScriptedGenerator::new();
        let mut record = RunRecord::new("run-1", "");
        record.parsed_sections.methodology = Some("given".to_string());
        ParserAgent::new(10_000, 100).run(&generator, Some("ignored"), &mut record);
        assert_eq!(record.parsed_sections.methodology.as_deref(), Some("given"));
        assert!(generator.requests().is_empty());
    }
}
