//! Shared deterministic types for the paper-to-repo pipeline.
//!
//! [`RunRecord`] is the single state object threaded through every stage. Stages
//! receive `&mut RunRecord` for the duration of one call and keep nothing.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Sections extracted from the source paper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedSections {
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub methodology: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub algorithms: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub libraries: Vec<String>,
}

/// Models report absent list fields as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ParsedSections {
    pub fn is_empty(&self) -> bool {
        self.abstract_text.is_none()
            && self.methodology.is_none()
            && self.algorithms.is_empty()
            && self.libraries.is_empty()
    }

    pub fn abstract_or_empty(&self) -> &str {
        self.abstract_text.as_deref().unwrap_or("").trim()
    }

    pub fn methodology_or_empty(&self) -> &str {
        self.methodology.as_deref().unwrap_or("").trim()
    }
}

/// Implementation plan produced by the planner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplementationPlan {
    pub overview: String,
    pub files: Vec<String>,
    pub classes: Vec<String>,
    pub functions: Vec<String>,
    pub libraries: Vec<String>,
    pub implementation_notes: String,
}

/// Repair decision kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairAction {
    /// Replace the generated code with a corrected version and re-execute.
    Patch,
    /// Regenerate the implementation from scratch with guidance.
    Recode,
}

impl RepairAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairAction::Patch => "patch",
            RepairAction::Recode => "recode",
        }
    }
}

/// Structured decision returned by the debugger role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugDecision {
    pub analysis: String,
    pub action: RepairAction,
    /// Replacement code for `patch`, guidance text for `recode`.
    pub output: String,
}

/// One diagnosed execution failure. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub error: String,
    pub analysis: String,
    pub action: RepairAction,
    pub guidance: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Complete,
    Partial,
    Incomplete,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Complete => "complete",
            Verdict::Partial => "partial",
            Verdict::Incomplete => "incomplete",
        }
    }
}

/// Reviewer verdict on the generated implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub verdict: Verdict,
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub missing: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub suggestions: Vec<String>,
}

/// Observable result of one materialized attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub tests_passed: bool,
    pub experiment_passed: bool,
    pub metrics_path: PathBuf,
    pub summary_path: PathBuf,
    pub log_path: PathBuf,
    /// One level of nested mappings flattened into `outer.inner` scalar entries.
    pub key_metrics: Map<String, Value>,
    pub plot_paths: Vec<PathBuf>,
}

/// Remote repository created by the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub repo_name: String,
    pub repo_url: String,
}

/// Mutable state for one paper-to-repo conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub user_instructions: String,
    pub parsed_sections: ParsedSections,
    pub implementation_plan: ImplementationPlan,
    pub generated_code: String,
    pub revision_count: u32,
    pub review_iteration: u32,
    pub error_history: Vec<FailureRecord>,
    /// Reviewer findings the next generation must address.
    pub review_requirements: Vec<String>,
    pub debug_action: Option<RepairAction>,
    pub execution_output: String,
    pub execution_error: String,
    pub execution_success: bool,
    pub observed_metrics: Map<String, Value>,
    pub run_result: Option<RunResult>,
    pub report_markdown: String,
    pub review_feedback: Option<ReviewFeedback>,
    pub output_repo_path: Option<PathBuf>,
    pub publication: Option<Publication>,
    pub publish_error: Option<String>,
    pub status: String,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, user_instructions: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            user_instructions: user_instructions.into(),
            status: "initialized".to_string(),
            ..Self::default()
        }
    }

    /// Guidance from the latest repair decision when it asked for a recode.
    pub fn recode_guidance(&self) -> Option<&str> {
        if self.debug_action != Some(RepairAction::Recode) {
            return None;
        }
        self.error_history
            .last()
            .and_then(|failure| failure.guidance.as_deref())
    }

    /// Start a fresh coding attempt after a non-complete review.
    ///
    /// Carries the review's missing features and suggestions forward and gives the
    /// new attempt a full repair budget.
    pub fn restart_for_review(&mut self) {
        let mut requirements = Vec::new();
        if let Some(feedback) = &self.review_feedback {
            requirements.extend(feedback.missing.iter().cloned());
            requirements.extend(feedback.suggestions.iter().cloned());
        }
        self.review_requirements = requirements;
        self.revision_count = 0;
        self.error_history.clear();
        self.debug_action = None;
        self.status = "recode requested by review".to_string();
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.review_feedback.as_ref().map(|feedback| feedback.verdict)
    }
}
