//! Tool names and the closed set of actions the controller can dispatch.
//!
//! Plans name tools by string. [`PlannedAction::from_step`] turns a plan step
//! into a typed variant; the orchestrator lowers `fs.create`/`fs.write` to the
//! internal `fs.write_diff` primitive before handing an [`Action`] to the bus.

pub mod catalog;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use serde_json::{Value, json};

use crate::core::plan::Step;
use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolName {
    FsRead,
    FsCreate,
    FsWrite,
    FsDelete,
    FsWriteDiff,
    ExecRun,
    DiagnosticsErrorSummary,
    GitStatus,
    GitDiff,
}

impl ToolName {
    pub const ALL: [ToolName; 9] = [
        ToolName::FsRead,
        ToolName::FsCreate,
        ToolName::FsWrite,
        ToolName::FsDelete,
        ToolName::FsWriteDiff,
        ToolName::ExecRun,
        ToolName::DiagnosticsErrorSummary,
        ToolName::GitStatus,
        ToolName::GitDiff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::FsRead => "fs.read",
            ToolName::FsCreate => "fs.create",
            ToolName::FsWrite => "fs.write",
            ToolName::FsDelete => "fs.delete",
            ToolName::FsWriteDiff => "fs.write_diff",
            ToolName::ExecRun => "exec.run",
            ToolName::DiagnosticsErrorSummary => "diagnostics.error_summary",
            ToolName::GitStatus => "git.status",
            ToolName::GitDiff => "git.diff",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| AgentError::UnknownTool(s.to_string()))
    }
}

impl Serialize for ToolName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A plan step, typed by tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    Read { path: String },
    Create { path: String, content: String },
    /// Edit an existing file. `content` is text the file must contain afterwards.
    Write { path: String, content: Option<String> },
    Delete { path: String },
    Run { command: String },
    ErrorSummary { stderr: Option<String> },
    GitStatus,
    GitDiff { path: Option<String> },
}

impl PlannedAction {
    pub fn from_step(step: &Step) -> Result<Self, AgentError> {
        let name: ToolName = step.action.parse()?;
        let path = || {
            step.target()
                .filter(|path| !path.is_empty())
                .ok_or_else(|| missing(step, "path"))
        };
        let action = match name {
            ToolName::FsRead => PlannedAction::Read { path: path()? },
            ToolName::FsCreate => PlannedAction::Create {
                path: path()?,
                content: step.content.clone().ok_or_else(|| missing(step, "content"))?,
            },
            ToolName::FsWrite => PlannedAction::Write {
                path: path()?,
                content: step.content.clone(),
            },
            ToolName::FsDelete => PlannedAction::Delete { path: path()? },
            ToolName::ExecRun => PlannedAction::Run {
                command: step
                    .command
                    .clone()
                    .filter(|command| !command.trim().is_empty())
                    .ok_or_else(|| missing(step, "command"))?,
            },
            ToolName::DiagnosticsErrorSummary => PlannedAction::ErrorSummary {
                stderr: step.content.clone(),
            },
            ToolName::GitStatus => PlannedAction::GitStatus,
            ToolName::GitDiff => PlannedAction::GitDiff {
                path: step.target(),
            },
            ToolName::FsWriteDiff => {
                return Err(AgentError::UnknownTool(format!(
                    "{} (internal to the controller)",
                    name
                )));
            }
        };
        Ok(action)
    }

    pub fn tool(&self) -> ToolName {
        match self {
            PlannedAction::Read { .. } => ToolName::FsRead,
            PlannedAction::Create { .. } => ToolName::FsCreate,
            PlannedAction::Write { .. } => ToolName::FsWrite,
            PlannedAction::Delete { .. } => ToolName::FsDelete,
            PlannedAction::Run { .. } => ToolName::ExecRun,
            PlannedAction::ErrorSummary { .. } => ToolName::DiagnosticsErrorSummary,
            PlannedAction::GitStatus => ToolName::GitStatus,
            PlannedAction::GitDiff { .. } => ToolName::GitDiff,
        }
    }
}

fn missing(step: &Step, field: &str) -> AgentError {
    AgentError::SchemaViolation(format!(
        "step {} ({}) is missing '{}'",
        step.step_id, step.action, field
    ))
}

/// One invocation handed to the tool bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Read { path: String },
    WriteDiff { path: String, diff: String },
    Delete { path: String },
    Run { command: String },
    ErrorSummary { stderr: String },
    GitStatus,
    GitDiff { path: Option<String> },
}

impl Action {
    pub fn tool(&self) -> ToolName {
        match self {
            Action::Read { .. } => ToolName::FsRead,
            Action::WriteDiff { .. } => ToolName::FsWriteDiff,
            Action::Delete { .. } => ToolName::FsDelete,
            Action::Run { .. } => ToolName::ExecRun,
            Action::ErrorSummary { .. } => ToolName::DiagnosticsErrorSummary,
            Action::GitStatus => ToolName::GitStatus,
            Action::GitDiff { .. } => ToolName::GitDiff,
        }
    }

    /// Arguments in the shape the tool's input schema describes.
    pub fn arguments(&self) -> Value {
        match self {
            Action::Read { path } | Action::Delete { path } => json!({ "path": path }),
            Action::WriteDiff { path, diff } => json!({ "path": path, "diff": diff }),
            Action::Run { command } => json!({ "command": command }),
            Action::ErrorSummary { stderr } => json!({ "content": stderr }),
            Action::GitStatus => json!({}),
            Action::GitDiff { path: Some(path) } => json!({ "path": path }),
            Action::GitDiff { path: None } => json!({}),
        }
    }
}
