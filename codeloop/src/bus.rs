//! Tool bus: the only place actions touch the working tree or spawn processes.
//!
//! Every invocation is re-checked here regardless of what plan validation
//! already decided: the contract must exist and permit the current phase, the
//! arguments must satisfy its input schema, and every path goes through
//! [`Safety`] before any file is read, patched or removed.

use std::fs;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::command_policy::CommandPolicy;
use crate::core::diagnostics::{self, ErrorSummary};
use crate::core::diff;
use crate::core::safety::Safety;
use crate::core::types::{CommandResult, ModelRole, Phase};
use crate::error::AgentError;
use crate::io::git::Git;
use crate::io::model::{ModelClient, ModelRequest};
use crate::io::patch::{PatchApplier, PatchOutcome};
use crate::io::process::run_argv;
use crate::io::prompt::PromptBuilder;
use crate::schemas::ResponseSchemas;
use crate::tools::Action;
use crate::tools::registry::ToolRegistry;

/// Resource ceilings applied by the bus.
#[derive(Debug, Clone, Copy)]
pub struct BusLimits {
    pub exec_timeout: Duration,
    pub vcs_timeout: Duration,
    pub output_limit_bytes: usize,
    pub max_diff_lines: usize,
}

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    File {
        path: String,
        content: String,
        exists: bool,
    },
    Patched {
        path: String,
        added: usize,
        removed: usize,
    },
    Deleted {
        path: String,
    },
    Command(CommandResult),
    Summary(ErrorSummary),
}

/// Shared, read-only services the bus dispatches to.
pub struct BusServices<'a> {
    pub registry: &'a ToolRegistry,
    pub safety: &'a Safety,
    pub policy: &'a CommandPolicy,
    pub applier: &'a dyn PatchApplier,
    pub model: &'a dyn ModelClient,
    pub prompts: &'a PromptBuilder,
    pub schemas: &'a ResponseSchemas,
}

pub struct ToolBus<'a> {
    services: BusServices<'a>,
    limits: BusLimits,
    git: Git,
    changes_made: bool,
    last_stderr: String,
}

impl<'a> ToolBus<'a> {
    pub fn new(services: BusServices<'a>, limits: BusLimits) -> Self {
        let git = Git::new(services.safety.root(), limits.vcs_timeout);
        Self {
            services,
            limits,
            git,
            changes_made: false,
            last_stderr: String::new(),
        }
    }

    /// True once a file was patched or deleted since the last [`reset`](Self::reset).
    pub fn changes_made(&self) -> bool {
        self.changes_made
    }

    /// Clear the cycle-scoped change flag.
    pub fn reset(&mut self) {
        self.changes_made = false;
    }

    /// Stderr of the most recent `exec.run`.
    pub fn last_stderr(&self) -> &str {
        &self.last_stderr
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    #[instrument(skip_all, fields(tool = %action.tool(), phase = %phase))]
    pub fn invoke(&mut self, phase: Phase, action: &Action) -> Result<ToolOutput, AgentError> {
        let tool = action.tool();
        let contract = self
            .services
            .registry
            .contract(tool)
            .ok_or_else(|| AgentError::UnknownTool(tool.to_string()))?;
        if !contract.permits(phase) {
            warn!("tool forbidden in phase");
            return Err(AgentError::ForbiddenInPhase {
                tool: tool.to_string(),
                phase: phase.to_string(),
            });
        }
        contract.check_arguments(&action.arguments())?;

        match action {
            Action::Read { path } => self.read(path),
            Action::WriteDiff { path, diff } => self.write_diff(path, diff),
            Action::Delete { path } => self.delete(path),
            Action::Run { command } => self.run(command),
            Action::ErrorSummary { stderr } => Ok(ToolOutput::Summary(self.summarize(stderr))),
            Action::GitStatus => self.git.status().map(ToolOutput::Command),
            Action::GitDiff { path } => {
                if let Some(path) = path {
                    self.services.safety.check(path)?;
                }
                self.git.diff(path.as_deref()).map(ToolOutput::Command)
            }
        }
    }

    fn read(&self, path: &str) -> Result<ToolOutput, AgentError> {
        let absolute = self.services.safety.check(path)?;
        if !absolute.is_file() {
            debug!(path, "read of missing file");
            return Ok(ToolOutput::File {
                path: path.to_string(),
                content: String::new(),
                exists: false,
            });
        }
        let bytes = fs::read(&absolute)
            .map_err(|err| AgentError::Execution(format!("read {path}: {err}")))?;
        Ok(ToolOutput::File {
            path: path.to_string(),
            content: String::from_utf8_lossy(&bytes).into_owned(),
            exists: true,
        })
    }

    fn write_diff(&mut self, path: &str, diff_text: &str) -> Result<ToolOutput, AgentError> {
        self.services.safety.check(path)?;
        let patch = diff::validate(path, diff_text, self.limits.max_diff_lines)?;
        let outcome = self
            .services
            .applier
            .apply(&patch, diff_text)
            .map_err(|err| AgentError::Execution(format!("{err:#}")))?;
        match outcome {
            PatchOutcome::Applied => {
                self.changes_made = true;
                let stats = patch.stats();
                debug!(path, added = stats.added, removed = stats.removed, "patch applied");
                Ok(ToolOutput::Patched {
                    path: path.to_string(),
                    added: stats.added,
                    removed: stats.removed,
                })
            }
            PatchOutcome::Conflict(reason) => Err(AgentError::Execution(format!(
                "patch for {path} did not apply: {reason}"
            ))),
        }
    }

    fn delete(&mut self, path: &str) -> Result<ToolOutput, AgentError> {
        let absolute = self.services.safety.check(path)?;
        if !absolute.is_file() {
            return Err(AgentError::Execution(format!("{path} does not exist")));
        }
        fs::remove_file(&absolute)
            .map_err(|err| AgentError::Execution(format!("remove {path}: {err}")))?;
        self.changes_made = true;
        Ok(ToolOutput::Deleted {
            path: path.to_string(),
        })
    }

    fn run(&mut self, command: &str) -> Result<ToolOutput, AgentError> {
        let argv = self.services.policy.check(command)?;
        let output = run_argv(
            &argv,
            self.services.safety.root(),
            self.limits.exec_timeout,
            self.limits.output_limit_bytes,
        )
        .map_err(|err| AgentError::Execution(format!("{err:#}")))?;
        let result = output.into_result("exec.run");
        debug!(exit_code = ?result.exit_code, timed_out = result.timed_out, "command finished");
        self.last_stderr = result.stderr.clone();
        Ok(ToolOutput::Command(result))
    }

    /// Model summary of `stderr`, or the deterministic fallback when the
    /// model fails, returns malformed JSON, or strays from the given text.
    fn summarize(&self, stderr: &str) -> ErrorSummary {
        let fallback = diagnostics::fallback_summary(stderr);
        if stderr.trim().is_empty() {
            return fallback;
        }
        let prompt = match self.services.prompts.diagnostics(stderr) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "diagnostics prompt failed");
                return fallback;
            }
        };
        let schema = self.services.schemas.error_summary.value();
        let reply = match self
            .services
            .model
            .query(&ModelRequest::json(ModelRole::Diagnostics, &prompt, schema))
        {
            Ok(reply) => reply,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "diagnostics query failed");
                return fallback;
            }
        };
        match self.services.schemas.error_summary.parse::<ErrorSummary>(&reply) {
            Ok(summary) if diagnostics::is_grounded(&summary, stderr) => summary,
            Ok(_) => {
                warn!("diagnostics summary not grounded in stderr");
                fallback
            }
            Err(reason) => {
                warn!(reason = %reason, "diagnostics reply unusable");
                fallback
            }
        }
    }
}
