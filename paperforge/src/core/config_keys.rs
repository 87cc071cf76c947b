//! Configuration keys the generated code expects, and the YAML profiles that
//! satisfy them.
//!
//! Detection is lexical: only direct `config["key"]` subscripts are found. Keys
//! read through another name or built dynamically stay undetected and fall back
//! to whatever default the generated code applies itself.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static CONFIG_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"config\[['"]([A-Za-z0-9_]+)['"]\]"#).expect("config key regex is valid")
});

/// Keys present in every emitted profile.
pub const BASELINE_KEYS: &[&str] = &[
    "algorithm",
    "connectivity_period",
    "dim",
    "max_iter",
    "max_iterations",
    "n_agents",
    "n_features",
    "n_samples",
    "penalty_param",
    "random_seed",
    "seed",
    "step_alpha",
    "step_beta",
    "step_size",
    "test_size",
];

/// Which profile a config file is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Default,
    Ablation,
}

/// A scalar config value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigValue {
    Int(i64),
    Float(f64),
    Text(&'static str),
}

impl ConfigValue {
    fn render(&self) -> String {
        match self {
            ConfigValue::Int(v) => v.to_string(),
            // Debug keeps the trailing `.0` so YAML loads a float, not an int.
            ConfigValue::Float(v) => format!("{v:?}"),
            ConfigValue::Text(v) => format!("\"{v}\""),
        }
    }
}

/// Value assigned to keys with no entry in the default table.
pub const PLACEHOLDER_VALUE: ConfigValue = ConfigValue::Int(1);

/// Return every key read via a literal `config[...]` subscript.
pub fn detect_config_keys(code: &str) -> BTreeSet<String> {
    CONFIG_KEY_RE
        .captures_iter(code)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Baseline keys plus the detected ones, sorted.
pub fn profile_keys(detected: &BTreeSet<String>) -> BTreeSet<String> {
    BASELINE_KEYS
        .iter()
        .map(|key| key.to_string())
        .chain(detected.iter().cloned())
        .collect()
}

pub fn default_value(key: &str, profile: Profile) -> ConfigValue {
    use ConfigValue::{Float, Int, Text};
    let ablation = profile == Profile::Ablation;
    let pick_int = |default: i64, alt: i64| Int(if ablation { alt } else { default });
    let pick_float = |default: f64, alt: f64| Float(if ablation { alt } else { default });

    match key {
        "seed" | "random_seed" => pick_int(42, 7),
        "n_agents" => pick_int(5, 4),
        "dim" | "dimension" => Int(2),
        "n_samples" => pick_int(240, 160),
        "n_features" => pick_int(16, 8),
        "test_size" => pick_float(0.2, 0.25),
        "max_iter" | "max_iterations" | "iterations" => pick_int(200, 100),
        "step_size" => pick_float(0.05, 0.1),
        "step_alpha" | "step_beta" => pick_float(0.05, 0.08),
        "connectivity_period" => Int(5),
        "penalty_param" => Float(1.0),
        "algorithm" => Text("DLPDS"),
        _ => PLACEHOLDER_VALUE,
    }
}

/// Render a YAML profile with one `key: value` line per key, sorted by key.
pub fn render_yaml_config(detected: &BTreeSet<String>, profile: Profile) -> String {
    let mut out = String::new();
    for key in profile_keys(detected) {
        out.push_str(&key);
        out.push_str(": ");
        out.push_str(&default_value(&key, profile).render());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_both_quote_styles() {
        let code = r#"
seed = config["seed"]
agents = config['n_agents']
lr = config.get("lr", 0.1)
other = cfg["ignored"]
"#;
        let keys = detect_config_keys(code);
        let expected: BTreeSet<String> = ["n_agents", "seed"].iter().map(|s| s.to_string()).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn profiles_differ_for_seeded_keys() {
        assert_eq!(default_value("seed", Profile::Default), ConfigValue::Int(42));
        assert_eq!(default_value("seed", Profile::Ablation), ConfigValue::Int(7));
        assert_eq!(default_value("unknown_key", Profile::Ablation), PLACEHOLDER_VALUE);
    }

    #[test]
    fn yaml_includes_detected_unknown_keys_with_placeholder() {
        let detected: BTreeSet<String> = ["hidden_units".to_string()].into_iter().collect();
        let yaml = render_yaml_config(&detected, Profile::Default);
        assert!(yaml.contains("hidden_units: 1\n"));
        assert!(yaml.contains("algorithm: \"DLPDS\"\n"));
        assert!(yaml.contains("penalty_param: 1.0\n"));
        assert!(yaml.contains("test_size: 0.2\n"));
        assert_eq!(yaml.lines().count(), BASELINE_KEYS.len() + 1);
    }

    #[test]
    fn yaml_lines_are_sorted() {
        let yaml = render_yaml_config(&BTreeSet::new(), Profile::Ablation);
        let keys: Vec<&str> = yaml
            .lines()
            .filter_map(|line| line.split(':').next())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }
}
