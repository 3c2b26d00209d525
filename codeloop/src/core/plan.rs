//! Plan data model produced by the planning model.
//!
//! A [`Plan`] is immutable once accepted. Structural invariants (unique step
//! ids, backwards-only dependencies) are checked by [`Plan::structural_errors`];
//! everything that needs the tool registry or the filesystem lives in
//! `crate::validate`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::core::fingerprint::digest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub plan_id: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub rollback_strategy: String,
    #[serde(default)]
    pub confidence: f64,
    /// Question for the user when the task cannot be planned without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: u32,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub accepted_exit_codes: Vec<i32>,
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default)]
    pub reason: String,
    /// Step ids this step relies on; `0` means "no dependency".
    #[serde(default)]
    pub depends_on: Vec<u32>,
}

impl Plan {
    /// Zero-confidence plan with no steps, used when the model output is unusable.
    pub fn fallback(goal: &str) -> Self {
        Self {
            plan_id: String::new(),
            goal: goal.to_string(),
            assumptions: Vec::new(),
            steps: Vec::new(),
            success_criteria: Vec::new(),
            rollback_strategy: String::new(),
            confidence: 0.0,
            clarification: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, step_id: u32) -> Option<&Step> {
        self.steps.iter().find(|step| step.step_id == step_id)
    }

    /// Hash of the plan's executable shape.
    ///
    /// Ignores ids, prose (`goal`, `reason`), and confidence, so two plans that
    /// would do the same thing share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let shape: Vec<Value> = self
            .steps
            .iter()
            .map(|step| {
                let mut deps: Vec<u32> = step
                    .depends_on
                    .iter()
                    .copied()
                    .filter(|dep| *dep != 0)
                    .collect();
                deps.sort_unstable();
                deps.dedup();
                json!([
                    step.action,
                    step.path.as_deref().map(normalize_relative),
                    step.command.as_deref().map(str::trim),
                    step.content,
                    step.accepted_exit_codes,
                    step.allow_failure,
                    deps,
                ])
            })
            .collect();
        digest(&Value::Array(shape).to_string())
    }

    /// Violations of plan-local invariants: step ids are unique and `>= 1`,
    /// and `depends_on` references only smaller step ids (or `0`).
    pub fn structural_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if step.step_id == 0 {
                errors.push("step_id must be >= 1".to_string());
            }
            if !seen.insert(step.step_id) {
                errors.push(format!("duplicate step_id {}", step.step_id));
            }
            for dep in &step.depends_on {
                if *dep != 0 && *dep >= step.step_id {
                    errors.push(format!(
                        "step {} depends_on {} which is not a smaller step id",
                        step.step_id, dep
                    ));
                } else if *dep != 0 && self.step(*dep).is_none() {
                    errors.push(format!(
                        "step {} depends_on unknown step {}",
                        step.step_id, dep
                    ));
                }
            }
        }
        errors
    }
}

impl Step {
    pub fn depends_on_step(&self, step_id: u32) -> bool {
        step_id != 0 && self.depends_on.contains(&step_id)
    }

    /// Action-specific arguments as a JSON object, for schema validation.
    pub fn arguments(&self) -> Value {
        let mut args = Map::new();
        if let Some(path) = &self.path {
            args.insert("path".to_string(), Value::String(path.clone()));
        }
        if let Some(command) = &self.command {
            args.insert("command".to_string(), Value::String(command.clone()));
        }
        if let Some(content) = &self.content {
            args.insert("content".to_string(), Value::String(content.clone()));
        }
        Value::Object(args)
    }

    /// Normalized target path, if the step has one.
    pub fn target(&self) -> Option<String> {
        self.path.as_deref().map(normalize_relative)
    }

    /// Whether an exit code counts as success for this step.
    pub fn accepts_exit_code(&self, code: Option<i32>) -> bool {
        match code {
            Some(0) => true,
            Some(code) => self.accepted_exit_codes.contains(&code),
            None => false,
        }
    }
}

/// Textual normalization used to compare step targets (`./a/b` == `a/b`).
pub fn normalize_relative(path: &str) -> String {
    let mut trimmed = path.trim().replace('\\', "/");
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest.to_string();
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{plan, read_step, run_step, write_step};

    #[test]
    fn fingerprint_ignores_prose_and_confidence() {
        let mut a = plan(vec![read_step(1, "src/lib.rs")]);
        let mut b = a.clone();
        a.goal = "first".to_string();
        b.goal = "second".to_string();
        b.confidence = 0.1;
        b.steps[0].reason = "different words".to_string();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_target() {
        let a = plan(vec![read_step(1, "src/lib.rs")]);
        let b = plan(vec![read_step(1, "src/main.rs")]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_treats_dot_slash_as_same_path() {
        let a = plan(vec![read_step(1, "./src/lib.rs")]);
        let b = plan(vec![read_step(1, "src/lib.rs")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn structural_errors_reports_duplicates_and_forward_edges() {
        let mut steps = vec![read_step(1, "a.rs"), write_step(1, "a.rs", "x", &[2])];
        steps.push(run_step(3, "cargo test"));
        let errors = plan(steps).structural_errors();
        assert!(errors.iter().any(|err| err.contains("duplicate step_id 1")));
        assert!(errors.iter().any(|err| err.contains("not a smaller step id")));
    }

    #[test]
    fn structural_errors_accepts_zero_dependency() {
        let mut step = read_step(1, "a.rs");
        step.depends_on = vec![0];
        assert!(plan(vec![step]).structural_errors().is_empty());
    }

    #[test]
    fn plan_parses_with_defaults() {
        let raw = r#"{"steps":[{"step_id":1,"action":"fs.read","path":"missing.rb"}]}"#;
        let parsed: Plan = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.confidence, 0.0);
        assert!(parsed.success_criteria.is_empty());
        assert_eq!(parsed.steps[0].arguments(), json!({"path": "missing.rb"}));
    }

    #[test]
    fn accepted_exit_codes_extend_success() {
        let mut step = run_step(1, "grep foo src");
        assert!(step.accepts_exit_code(Some(0)));
        assert!(!step.accepts_exit_code(Some(1)));
        step.accepted_exit_codes = vec![1];
        assert!(step.accepts_exit_code(Some(1)));
        assert!(!step.accepts_exit_code(None));
    }
}
