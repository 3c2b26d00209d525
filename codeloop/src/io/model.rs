//! Model client abstraction.
//!
//! The [`ModelClient`] trait decouples the control loop from the model
//! backend. The default backend pipes the prompt into a configured command
//! (`codex exec -` unless configured otherwise) and returns its stdout. Tests
//! use `test_support::ScriptedModel`.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::types::ModelRole;
use crate::io::process::run_command_with_timeout;

/// Parameters for one model query.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    pub role: ModelRole,
    pub prompt: &'a str,
    /// JSON Schema the response must satisfy, when the role expects JSON.
    pub response_format: Option<&'a Value>,
}

impl<'a> ModelRequest<'a> {
    pub fn text(role: ModelRole, prompt: &'a str) -> Self {
        Self {
            role,
            prompt,
            response_format: None,
        }
    }

    pub fn json(role: ModelRole, prompt: &'a str, schema: &'a Value) -> Self {
        Self {
            role,
            prompt,
            response_format: Some(schema),
        }
    }
}

/// Abstraction over model backends. Responses are untrusted text.
pub trait ModelClient {
    fn query(&self, request: &ModelRequest<'_>) -> Result<String>;
}

/// Model backend that runs an external command per query.
///
/// The prompt is written to stdin. The role and the response schema (if any)
/// are passed through `CODELOOP_MODEL_ROLE` and `CODELOOP_RESPONSE_SCHEMA`.
#[derive(Debug, Clone)]
pub struct CommandModel {
    argv: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModel {
    pub fn new(
        argv: Vec<String>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            argv,
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }
}

impl ModelClient for CommandModel {
    #[instrument(skip_all, fields(role = request.role.as_str(), prompt_bytes = request.prompt.len()))]
    fn query(&self, request: &ModelRequest<'_>) -> Result<String> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("model.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("CODELOOP_MODEL_ROLE", request.role.as_str());
        if let Some(schema) = request.response_format {
            cmd.env("CODELOOP_RESPONSE_SCHEMA", schema.to_string());
        }

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )?;
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model command timed out");
            return Err(anyhow!("model command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(response_bytes = text.len(), "model responded");
        Ok(text)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn model(argv: &[&str]) -> CommandModel {
        CommandModel::new(
            argv.iter().map(|part| part.to_string()).collect(),
            std::env::temp_dir(),
            Duration::from_secs(10),
            4096,
        )
    }

    #[test]
    fn pipes_prompt_through_command() {
        let reply = model(&["cat"])
            .query(&ModelRequest::text(ModelRole::Developer, "hello"))
            .expect("query");
        assert_eq!(reply, "hello");
    }

    #[test]
    fn exposes_role_and_schema_to_command() {
        let schema = json!({"type": "object"});
        let reply = model(&["sh", "-c", "printf '%s %s' \"$CODELOOP_MODEL_ROLE\" \"$CODELOOP_RESPONSE_SCHEMA\""])
            .query(&ModelRequest::json(ModelRole::Planner, "", &schema))
            .expect("query");
        assert_eq!(reply, "planner {\"type\":\"object\"}");
    }

    #[test]
    fn failing_command_is_an_error() {
        let err = model(&["sh", "-c", "echo broken >&2; exit 2"])
            .query(&ModelRequest::text(ModelRole::Reviewer, "x"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("broken"));
    }
}
