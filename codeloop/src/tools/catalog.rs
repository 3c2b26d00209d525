//! Static tool catalog.

use serde_json::{Value, json};

use crate::core::types::Phase;
use crate::tools::ToolName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Filesystem,
    Process,
    Diagnostics,
    Vcs,
}

/// Declarative part of a tool contract, before schema compilation.
pub struct ContractSpec {
    pub name: ToolName,
    pub category: ToolCategory,
    pub description: &'static str,
    pub inputs_schema: Value,
    pub outputs_schema: Value,
    pub allowed_phases: &'static [Phase],
    pub forbidden_phases: &'static [Phase],
    pub dependencies: &'static [&'static str],
    pub side_effects: &'static [&'static str],
    pub safety_rules: &'static [&'static str],
    pub internal: bool,
    pub read_only: bool,
}

const PLAN_AND_EXECUTE: &[Phase] = &[Phase::Planning, Phase::Execution];
const PLAN_EXECUTE_OBSERVE: &[Phase] = &[Phase::Planning, Phase::Execution, Phase::Observation];
const NOT_AFTER_EXECUTION: &[Phase] = &[Phase::Observation, Phase::Reduction, Phase::Decision];

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn path_property() -> Value {
    json!({ "type": "string", "minLength": 1 })
}

fn command_output_schema() -> Value {
    object(
        json!({
            "stdout": { "type": "string" },
            "stderr": { "type": "string" },
            "exit_code": { "type": ["integer", "null"] },
        }),
        &["stdout", "stderr", "exit_code"],
    )
}

pub fn builtin() -> Vec<ContractSpec> {
    vec![
        ContractSpec {
            name: ToolName::FsRead,
            category: ToolCategory::Filesystem,
            description: "Read a file relative to the repository root. Missing files read as empty.",
            inputs_schema: object(json!({ "path": path_property() }), &["path"]),
            outputs_schema: object(
                json!({ "path": { "type": "string" }, "content": { "type": "string" } }),
                &["path", "content"],
            ),
            allowed_phases: PLAN_AND_EXECUTE,
            forbidden_phases: &[],
            dependencies: &[],
            side_effects: &[],
            safety_rules: &["path must pass the sandbox policy"],
            internal: false,
            read_only: true,
        },
        ContractSpec {
            name: ToolName::FsCreate,
            category: ToolCategory::Filesystem,
            description: "Create a new file with exactly the given content. Fails if the file exists.",
            inputs_schema: object(
                json!({ "path": path_property(), "content": { "type": "string" } }),
                &["path", "content"],
            ),
            outputs_schema: object(json!({ "path": { "type": "string" } }), &["path"]),
            allowed_phases: PLAN_AND_EXECUTE,
            forbidden_phases: NOT_AFTER_EXECUTION,
            dependencies: &["path must not exist yet"],
            side_effects: &["creates one file"],
            safety_rules: &["path must pass the sandbox policy"],
            internal: false,
            read_only: false,
        },
        ContractSpec {
            name: ToolName::FsWrite,
            category: ToolCategory::Filesystem,
            description: "Edit an existing file. `content` is text the file must contain afterwards; `reason` describes the change.",
            inputs_schema: object(
                json!({ "path": path_property(), "content": { "type": "string" } }),
                &["path"],
            ),
            outputs_schema: object(json!({ "path": { "type": "string" } }), &["path"]),
            allowed_phases: PLAN_AND_EXECUTE,
            forbidden_phases: NOT_AFTER_EXECUTION,
            dependencies: &[
                "path must already exist",
                "requires a depends_on edge to a prior fs.read of the same path",
            ],
            side_effects: &["modifies one file through a unified diff"],
            safety_rules: &["path must pass the sandbox policy", "diff size is capped"],
            internal: false,
            read_only: false,
        },
        ContractSpec {
            name: ToolName::FsDelete,
            category: ToolCategory::Filesystem,
            description: "Delete a file relative to the repository root.",
            inputs_schema: object(json!({ "path": path_property() }), &["path"]),
            outputs_schema: object(json!({ "path": { "type": "string" } }), &["path"]),
            allowed_phases: PLAN_AND_EXECUTE,
            forbidden_phases: NOT_AFTER_EXECUTION,
            dependencies: &[],
            side_effects: &["removes one file"],
            safety_rules: &["path must pass the sandbox policy"],
            internal: false,
            read_only: false,
        },
        ContractSpec {
            name: ToolName::FsWriteDiff,
            category: ToolCategory::Filesystem,
            description: "Apply a unified diff to one file. Controller use only.",
            inputs_schema: object(
                json!({ "path": path_property(), "diff": { "type": "string", "minLength": 1 } }),
                &["path", "diff"],
            ),
            outputs_schema: object(
                json!({ "path": { "type": "string" }, "added": { "type": "integer" }, "removed": { "type": "integer" } }),
                &["path"],
            ),
            allowed_phases: &[Phase::Execution],
            forbidden_phases: NOT_AFTER_EXECUTION,
            dependencies: &["requires a prior fs.read of the same path unless creating"],
            side_effects: &["modifies one file"],
            safety_rules: &[
                "path must pass the sandbox policy",
                "diff header must name the path",
                "diff must contain a hunk",
                "diff size is capped",
            ],
            internal: true,
            read_only: false,
        },
        ContractSpec {
            name: ToolName::ExecRun,
            category: ToolCategory::Process,
            description: "Run a command (no shell) in the repository root with a timeout. A non-zero exit code is reported, not raised.",
            inputs_schema: object(
                json!({ "command": { "type": "string", "minLength": 1 } }),
                &["command"],
            ),
            outputs_schema: command_output_schema(),
            allowed_phases: PLAN_EXECUTE_OBSERVE,
            forbidden_phases: &[],
            dependencies: &[],
            side_effects: &["spawns one process"],
            safety_rules: &[
                "command must match an allowed prefix",
                "destructive commands, sudo, and pipe-to-shell are refused",
                "output is truncated",
            ],
            internal: false,
            read_only: true,
        },
        ContractSpec {
            name: ToolName::DiagnosticsErrorSummary,
            category: ToolCategory::Diagnostics,
            description: "Summarize captured stderr into a root cause. Defaults to the last command's stderr.",
            inputs_schema: object(json!({ "content": { "type": "string" } }), &[]),
            outputs_schema: object(
                json!({ "root_cause": { "type": "string" }, "confidence": { "type": "number" } }),
                &["root_cause", "confidence"],
            ),
            allowed_phases: PLAN_EXECUTE_OBSERVE,
            forbidden_phases: &[],
            dependencies: &[],
            side_effects: &[],
            safety_rules: &["summary must be grounded in the given text"],
            internal: false,
            read_only: true,
        },
        ContractSpec {
            name: ToolName::GitStatus,
            category: ToolCategory::Vcs,
            description: "Show working tree status (read-only).",
            inputs_schema: object(json!({}), &[]),
            outputs_schema: command_output_schema(),
            allowed_phases: PLAN_EXECUTE_OBSERVE,
            forbidden_phases: &[],
            dependencies: &[],
            side_effects: &[],
            safety_rules: &["read-only"],
            internal: false,
            read_only: true,
        },
        ContractSpec {
            name: ToolName::GitDiff,
            category: ToolCategory::Vcs,
            description: "Show unstaged changes, optionally for one path (read-only).",
            inputs_schema: object(json!({ "path": path_property() }), &[]),
            outputs_schema: command_output_schema(),
            allowed_phases: PLAN_EXECUTE_OBSERVE,
            forbidden_phases: &[],
            dependencies: &[],
            side_effects: &[],
            safety_rules: &["read-only"],
            internal: false,
            read_only: true,
        },
    ]
}
