//! Shared deterministic types for the control loop.
//!
//! These types define stable contracts between core components. They carry no
//! I/O and serialize to the shapes used in traces and prompts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stage of the orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Execution,
    Observation,
    Reduction,
    Decision,
    Done,
    Halted,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Planning,
        Phase::Execution,
        Phase::Observation,
        Phase::Reduction,
        Phase::Decision,
        Phase::Done,
        Phase::Halted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Execution => "execution",
            Phase::Observation => "observation",
            Phase::Reduction => "reduction",
            Phase::Decision => "decision",
            Phase::Done => "done",
            Phase::Halted => "halted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Halted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| format!("unknown phase '{s}'"))
    }
}

/// What the user asked for, as far as routing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    CodeChange,
    Investigate,
    Explanation,
    General,
    Reject,
}

impl Intent {
    /// Intents answered without tool access; they never enter the loop.
    pub fn is_answer_only(&self) -> bool {
        matches!(self, Intent::Explanation | Intent::General | Intent::Reject)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::CodeChange => "CODE_CHANGE",
            Intent::Investigate => "INVESTIGATE",
            Intent::Explanation => "EXPLANATION",
            Intent::General => "GENERAL",
            Intent::Reject => "REJECT",
        }
    }
}

/// Model role a query is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Planner,
    Developer,
    Reviewer,
    Diagnostics,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Planner => "planner",
            ModelRole::Developer => "developer",
            ModelRole::Reviewer => "reviewer",
            ModelRole::Diagnostics => "diagnostics",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Skip => "SKIP",
        }
    }
}

/// Tagged record appended to the agent state. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Observation {
    FileRead {
        step_id: u32,
        path: String,
        bytes: usize,
    },
    FileWritten {
        step_id: u32,
        path: String,
        created: bool,
    },
    FileMissing {
        step_id: u32,
        path: String,
    },
    FileDeleted {
        step_id: u32,
        path: String,
    },
    PatchApplied {
        step_id: u32,
        path: String,
        added: usize,
        removed: usize,
    },
    CommandRan {
        step_id: u32,
        command: String,
        exit_code: Option<i32>,
    },
    TestResult {
        status: TestStatus,
        command: Option<String>,
    },
    ToolRejected {
        step_id: u32,
        tool: String,
        reason: String,
    },
    ActionFailed {
        step_id: u32,
        message: String,
    },
    NoChanges,
    PlanRejected {
        reason: String,
    },
}

impl Observation {
    pub fn kind(&self) -> &'static str {
        match self {
            Observation::FileRead { .. } => "FILE_READ",
            Observation::FileWritten { .. } => "FILE_WRITTEN",
            Observation::FileMissing { .. } => "FILE_MISSING",
            Observation::FileDeleted { .. } => "FILE_DELETED",
            Observation::PatchApplied { .. } => "PATCH_APPLIED",
            Observation::CommandRan { .. } => "COMMAND_RAN",
            Observation::TestResult { .. } => "TEST_RESULT",
            Observation::ToolRejected { .. } => "TOOL_REJECTED",
            Observation::ActionFailed { .. } => "ACTION_FAILED",
            Observation::NoChanges => "NO_CHANGES",
            Observation::PlanRejected { .. } => "PLAN_REJECTED",
        }
    }

    /// The path, command, or status the observation is about.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Observation::FileRead { path, .. }
            | Observation::FileWritten { path, .. }
            | Observation::FileMissing { path, .. }
            | Observation::FileDeleted { path, .. }
            | Observation::PatchApplied { path, .. } => Some(path),
            Observation::CommandRan { command, .. } => Some(command),
            Observation::TestResult { status, .. } => Some(status.as_str()),
            Observation::ToolRejected { tool, .. } => Some(tool),
            Observation::ActionFailed { .. }
            | Observation::NoChanges
            | Observation::PlanRejected { .. } => None,
        }
    }

    /// One-line rendering used by the reduction summary.
    pub fn describe(&self) -> String {
        match self {
            Observation::FileRead { path, bytes, .. } => format!("FILE_READ {path} ({bytes} bytes)"),
            Observation::FileWritten { path, created, .. } => {
                if *created {
                    format!("FILE_WRITTEN {path} (created)")
                } else {
                    format!("FILE_WRITTEN {path}")
                }
            }
            Observation::FileMissing { path, .. } => format!("FILE_MISSING {path}"),
            Observation::FileDeleted { path, .. } => format!("FILE_DELETED {path}"),
            Observation::PatchApplied {
                path,
                added,
                removed,
                ..
            } => format!("PATCH_APPLIED {path} (+{added} -{removed})"),
            Observation::CommandRan {
                command, exit_code, ..
            } => match exit_code {
                Some(code) => format!("COMMAND_RAN `{command}` exit {code}"),
                None => format!("COMMAND_RAN `{command}` (no exit code)"),
            },
            Observation::TestResult { status, .. } => format!("TEST_RESULT {}", status.as_str()),
            Observation::ToolRejected { tool, reason, .. } => {
                format!("TOOL_REJECTED {tool}: {reason}")
            }
            Observation::ActionFailed { step_id, message } => {
                format!("ACTION_FAILED step {step_id}: {message}")
            }
            Observation::NoChanges => "NO_CHANGES".to_string(),
            Observation::PlanRejected { reason } => format!("PLAN_REJECTED {reason}"),
        }
    }

    pub fn is_test(&self, status: TestStatus) -> bool {
        matches!(self, Observation::TestResult { status: s, .. } if *s == status)
    }

    /// A file in the sandbox was written, patched or deleted.
    pub fn is_modification(&self) -> bool {
        matches!(
            self,
            Observation::FileWritten { .. }
                | Observation::FileDeleted { .. }
                | Observation::PatchApplied { .. }
        )
    }
}

/// Captured result of a command run through the tool bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Success,
    Retry,
    Blocked,
}

/// Which rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBasis {
    TestFailed,
    NoCriteria,
    TestPassed,
    Unverified,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub reason: String,
    pub confidence: f64,
    pub basis: DecisionBasis,
}

/// Result of a controller-owned goal check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalVerdict {
    pub satisfied: bool,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_round_trips_through_str() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>(), Ok(phase));
        }
        assert!("review".parse::<Phase>().is_err());
    }

    #[test]
    fn observation_serializes_with_kind_tag() {
        let obs = Observation::TestResult {
            status: TestStatus::Fail,
            command: Some("cargo test".to_string()),
        };
        let value = serde_json::to_value(&obs).expect("serialize");
        assert_eq!(value["kind"], "TEST_RESULT");
        assert_eq!(value["status"], "FAIL");
        assert_eq!(obs.kind(), "TEST_RESULT");
        assert_eq!(obs.describe(), "TEST_RESULT FAIL");
    }

    #[test]
    fn answer_only_intents() {
        assert!(Intent::Reject.is_answer_only());
        assert!(Intent::General.is_answer_only());
        assert!(!Intent::CodeChange.is_answer_only());
        assert!(!Intent::Investigate.is_answer_only());
    }
}
