//! Typed failures raised while validating and executing plans.
//!
//! Infrastructure failures (spawning processes, reading config, rendering
//! prompts) stay on `anyhow`. Everything the control loop has to reason about,
//! count, or feed back to the planner is an [`AgentError`].

use thiserror::Error;

use crate::core::fingerprint::normalize_signature;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("path not allowed: '{path}' ({reason})")]
    PathNotAllowed { path: String, reason: String },

    #[error("invalid diff for '{path}': {reason}")]
    DiffInvalid { path: String, reason: String },

    #[error("step {step_id} ({action} '{path}') has no depends_on edge to a prior fs.read of the same path")]
    DependencyUnmet {
        step_id: u32,
        action: String,
        path: String,
    },

    #[error("command not allowed: '{command}' ({reason})")]
    CommandNotAllowed { command: String, reason: String },

    #[error("step {step_id} failed: {message}")]
    StepFailed { step_id: u32, message: String },

    #[error("tool '{tool}' is forbidden during {phase}")]
    ForbiddenInPhase { tool: String, phase: String },

    #[error("plan rejected: {0}")]
    PlanRejected(String),

    #[error("not a repository: {0}")]
    NotARepository(String),

    #[error("execution failed: {0}")]
    Execution(String),
}

impl AgentError {
    /// Stable variant name, used in traces and error records.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::UnknownTool(_) => "UnknownTool",
            AgentError::SchemaViolation(_) => "SchemaViolation",
            AgentError::PathNotAllowed { .. } => "PathNotAllowed",
            AgentError::DiffInvalid { .. } => "DiffInvalid",
            AgentError::DependencyUnmet { .. } => "DependencyUnmet",
            AgentError::CommandNotAllowed { .. } => "CommandNotAllowed",
            AgentError::StepFailed { .. } => "StepFailed",
            AgentError::ForbiddenInPhase { .. } => "ForbiddenInPhase",
            AgentError::PlanRejected(_) => "PlanRejected",
            AgentError::NotARepository(_) => "NotARepository",
            AgentError::Execution(_) => "Execution",
        }
    }

    /// Normalized signature: two errors that differ only in numbers or
    /// whitespace share a signature.
    pub fn signature(&self) -> String {
        normalize_signature(&format!("{}: {}", self.kind(), self))
    }

    /// True for errors that count towards the tool-rejection hard stop.
    pub fn is_tool_rejection(&self) -> bool {
        matches!(
            self,
            AgentError::UnknownTool(_)
                | AgentError::PathNotAllowed { .. }
                | AgentError::CommandNotAllowed { .. }
                | AgentError::ForbiddenInPhase { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_ignores_step_numbers() {
        let a = AgentError::StepFailed {
            step_id: 1,
            message: "exit code 2".to_string(),
        };
        let b = AgentError::StepFailed {
            step_id: 4,
            message: "exit code 17".to_string(),
        };
        assert_eq!(a.signature(), b.signature());
        assert!(a.signature().starts_with("StepFailed:"));
    }

    #[test]
    fn signatures_differ_across_kinds() {
        let unknown = AgentError::UnknownTool("fs.scan".to_string());
        let schema = AgentError::SchemaViolation("fs.scan".to_string());
        assert_ne!(unknown.signature(), schema.signature());
    }

    #[test]
    fn rejection_kinds_are_counted() {
        assert!(
            AgentError::CommandNotAllowed {
                command: "sudo ls".to_string(),
                reason: "privilege escalation".to_string(),
            }
            .is_tool_rejection()
        );
        assert!(!AgentError::Execution("boom".to_string()).is_tool_rejection());
    }
}
