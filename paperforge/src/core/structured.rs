//! Decoding of structured model responses.
//!
//! Model output is untrusted text. [`decode`] turns it into either a parsed
//! payload or an explicit [`Structured::Malformed`] reason, so every caller has
//! to decide what a broken response means for its stage.

use std::sync::LazyLock;

use jsonschema::Draft;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").expect("fence regex is valid")
});

/// Outcome of asking the generation service for structured output.
#[derive(Debug, Clone, PartialEq)]
pub enum Structured<T> {
    Parsed(T),
    /// The service failed, or its response did not match the expected shape.
    Malformed { reason: String },
}

impl<T> Structured<T> {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Structured::Malformed {
            reason: reason.into(),
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Structured::Parsed(value) => Some(value),
            Structured::Malformed { .. } => None,
        }
    }
}

/// Remove one surrounding Markdown code fence, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    match FENCE_RE.captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str(),
        None => trimmed,
    }
}

/// Parse `raw` as JSON, validate it against `schema` (Draft 2020-12) and
/// deserialize it into `T`.
pub fn decode<T: DeserializeOwned>(raw: &str, schema: &Value) -> Structured<T> {
    let instance: Value = match serde_json::from_str(strip_code_fences(raw)) {
        Ok(value) => value,
        Err(err) => return Structured::malformed(format!("response is not JSON: {err}")),
    };
    let validator = match jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
    {
        Ok(validator) => validator,
        Err(err) => return Structured::malformed(format!("invalid output schema: {err}")),
    };
    let messages: Vec<String> = validator
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Structured::malformed(format!(
            "schema validation failed: {}",
            messages.join("; ")
        ));
    }
    match serde_json::from_value(instance) {
        Ok(value) => Structured::Parsed(value),
        Err(err) => Structured::malformed(format!("unexpected response shape: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DebugDecision, RepairAction};
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["analysis", "action", "output"],
            "properties": {
                "analysis": {"type": "string"},
                "action": {"enum": ["patch", "recode"]},
                "output": {"type": "string"}
            }
        })
    }

    #[test]
    fn decodes_valid_response() {
        let raw = r#"{"analysis": "typo", "action": "patch", "output": "print(1)"}"#;
        let decoded: Structured<DebugDecision> = decode(raw, &schema());
        let decision = decoded.ok().expect("parsed");
        assert_eq!(decision.action, RepairAction::Patch);
    }

    #[test]
    fn decodes_fenced_response() {
        let raw = "```json\n{\"analysis\": \"a\", \"action\": \"recode\", \"output\": \"g\"}\n```";
        let decoded: Structured<DebugDecision> = decode(raw, &schema());
        assert!(matches!(decoded, Structured::Parsed(_)));
    }

    #[test]
    fn non_json_is_malformed() {
        let decoded: Structured<DebugDecision> = decode("I think you should patch", &schema());
        let Structured::Malformed { reason } = decoded else {
            panic!("expected malformed");
        };
        assert!(reason.contains("not JSON"));
    }

    #[test]
    fn schema_violation_is_malformed() {
        let raw = r#"{"analysis": "a", "action": "rewrite", "output": "x"}"#;
        let decoded: Structured<DebugDecision> = decode(raw, &schema());
        let Structured::Malformed { reason } = decoded else {
            panic!("expected malformed");
        };
        assert!(reason.contains("schema validation failed"));
    }

    #[test]
    fn strip_code_fences_leaves_plain_text() {
        assert_eq!(strip_code_fences("  x = 1\n"), "x = 1");
        assert_eq!(strip_code_fences("```python\nx = 1\n```"), "x = 1");
        assert_eq!(strip_code_fences("```\nx = 1\ny = 2\n```\n"), "x = 1\ny = 2");
    }
}
