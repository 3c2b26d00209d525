//! JSON Schemas for structured model responses.
//!
//! Compiled once at startup. Every structured response goes through
//! [`ResponseSchema::parse`]: repair, schema check, then deserialization.

use std::fmt;

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::json_repair::{drop_nulls, extract_object};

const PLAN_SCHEMA: &str = include_str!("../schemas/plan.schema.json");
const REVIEW_SCHEMA: &str = include_str!("../schemas/review.schema.json");
const INTENT_SCHEMA: &str = include_str!("../schemas/intent.schema.json");
const DECISION_SCHEMA: &str = include_str!("../schemas/decision.schema.json");
const ERROR_SUMMARY_SCHEMA: &str = include_str!("../schemas/error_summary.schema.json");

pub struct ResponseSchema {
    name: &'static str,
    value: Value,
    validator: Validator,
}

impl fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSchema")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ResponseSchema {
    fn compile(name: &'static str, source: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(source).with_context(|| format!("parse {name} schema"))?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&value)
            .with_context(|| format!("compile {name} schema"))?;
        Ok(Self {
            name,
            value,
            validator,
        })
    }

    /// Raw schema, passed to the model as the response format.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn check(&self, instance: &Value) -> Result<(), String> {
        let messages: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect();
        if messages.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "{} response violates schema: {}",
                self.name,
                messages.join("; ")
            ))
        }
    }

    /// Extract, validate and deserialize a model response.
    ///
    /// The error string describes what was wrong; callers fall back to a
    /// deterministic value instead of propagating it.
    pub fn parse<T: DeserializeOwned>(&self, text: &str) -> Result<T, String> {
        let mut value = extract_object(text)
            .ok_or_else(|| format!("{} response contains no JSON object", self.name))?;
        drop_nulls(&mut value);
        self.check(&value)?;
        serde_json::from_value(value).map_err(|err| format!("{} response: {err}", self.name))
    }
}

#[derive(Debug)]
pub struct ResponseSchemas {
    pub plan: ResponseSchema,
    pub review: ResponseSchema,
    pub intent: ResponseSchema,
    pub decision: ResponseSchema,
    pub error_summary: ResponseSchema,
}

impl ResponseSchemas {
    pub fn load() -> Result<Self> {
        Ok(Self {
            plan: ResponseSchema::compile("plan", PLAN_SCHEMA)?,
            review: ResponseSchema::compile("review", REVIEW_SCHEMA)?,
            intent: ResponseSchema::compile("intent", INTENT_SCHEMA)?,
            decision: ResponseSchema::compile("decision", DECISION_SCHEMA)?,
            error_summary: ResponseSchema::compile("error_summary", ERROR_SUMMARY_SCHEMA)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::Plan;
    use crate::core::diagnostics::ErrorSummary;

    fn schemas() -> ResponseSchemas {
        ResponseSchemas::load().expect("schemas")
    }

    #[test]
    fn parses_fenced_plan_with_nulls() {
        let text = "```json\n{\"goal\": null, \"confidence\": 0.8, \"steps\": [{\"step_id\": 1, \"action\": \"fs.read\", \"path\": \"a.rs\", \"command\": null, \"depends_on\": [0]}]}\n```";
        let plan: Plan = schemas().plan.parse(text).expect("plan");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].path.as_deref(), Some("a.rs"));
        assert_eq!(plan.steps[0].command, None);
        assert_eq!(plan.goal, "");
    }

    #[test]
    fn rejects_schema_violations() {
        let schemas = schemas();
        let err = schemas
            .plan
            .parse::<Plan>("{\"steps\": [{\"action\": \"fs.read\"}]}")
            .unwrap_err();
        assert!(err.contains("plan response violates schema"), "{err}");
        let err = schemas
            .plan
            .parse::<Plan>("{\"steps\": [], \"confidence\": 3}")
            .unwrap_err();
        assert!(err.contains("violates schema"), "{err}");
    }

    #[test]
    fn rejects_non_json() {
        let err = schemas()
            .error_summary
            .parse::<ErrorSummary>("the build failed")
            .unwrap_err();
        assert!(err.contains("no JSON object"));
    }
}
