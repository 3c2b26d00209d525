//! Plan validation, run once per proposed plan before anything executes.
//!
//! Each rule returns a typed [`AgentError`] naming what was wrong, so the
//! rejection can be fed back to the next planning attempt.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::core::plan::{Plan, Step};
use crate::core::safety::Safety;
use crate::core::state::AgentState;
use crate::core::types::Phase;
use crate::error::AgentError;
use crate::tools::ToolName;
use crate::tools::registry::ToolRegistry;

/// Thresholds taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct PlanRules {
    pub min_confidence: f64,
    pub max_initial_reads: usize,
}

/// Everything plan validation consults besides the plan itself.
pub struct PlanCheck<'a> {
    pub registry: &'a ToolRegistry,
    pub safety: &'a Safety,
    pub state: &'a AgentState,
    pub rules: PlanRules,
    /// Whether a normalized relative path exists in the working tree now.
    pub exists: &'a dyn Fn(&str) -> bool,
}

/// Validate `plan` against the registry, sandbox, working tree and history.
pub fn validate_plan(plan: &Plan, check: &PlanCheck<'_>) -> Result<(), AgentError> {
    check_write_dependencies(plan)?;

    let structural = plan.structural_errors();
    if !structural.is_empty() {
        return Err(AgentError::SchemaViolation(structural.join("; ")));
    }

    let visible = check.registry.tools_for_phase(Phase::Planning);
    for step in &plan.steps {
        if !visible.contains_key(step.action.as_str()) {
            return Err(AgentError::UnknownTool(step.action.clone()));
        }
    }

    for step in &plan.steps {
        check.registry.validate(&step.action, &step.arguments())?;
        if let Some(path) = step.target() {
            check.safety.check(&path)?;
        }
    }

    check_existence(plan, check.exists)?;

    if check.state.cycle <= 1 {
        check_initial_reads(plan, check.rules.max_initial_reads)?;
    }

    let read_only = plan.steps.iter().all(|step| {
        check
            .registry
            .fetch(&step.action)
            .is_some_and(|contract| contract.read_only)
    });
    if plan.confidence < check.rules.min_confidence && !read_only {
        return Err(AgentError::PlanRejected(format!(
            "confidence {:.2} is below the floor of {:.2} for a plan that changes files",
            plan.confidence, check.rules.min_confidence
        )));
    }

    if check.state.repeats_without_progress(plan) {
        return Err(AgentError::PlanRejected(
            "this plan was already attempted and nothing has changed since".to_string(),
        ));
    }

    debug!(steps = plan.steps.len(), read_only, "plan accepted");
    Ok(())
}

/// Every `fs.write` needs a `depends_on` edge to an earlier `fs.read` of the
/// same path.
pub fn check_write_dependencies(plan: &Plan) -> Result<(), AgentError> {
    for step in &plan.steps {
        if step.action != ToolName::FsWrite.as_str() {
            continue;
        }
        let Some(path) = step.target() else {
            continue;
        };
        if !write_dependency_met(plan, step) {
            return Err(AgentError::DependencyUnmet {
                step_id: step.step_id,
                action: step.action.clone(),
                path,
            });
        }
    }
    Ok(())
}

/// Whether `step` depends on an earlier `fs.read` of its own target.
pub fn write_dependency_met(plan: &Plan, step: &Step) -> bool {
    let Some(path) = step.target() else {
        return false;
    };
    step.depends_on.iter().any(|&dep| {
        dep < step.step_id
            && step.depends_on_step(dep)
            && plan.step(dep).is_some_and(|read| {
                read.action == ToolName::FsRead.as_str() && read.target().as_ref() == Some(&path)
            })
    })
}

/// `fs.write` needs an existing file and `fs.create` a missing one, taking
/// earlier creates and deletes in the same plan into account.
fn check_existence(plan: &Plan, exists: &dyn Fn(&str) -> bool) -> Result<(), AgentError> {
    let mut created = BTreeSet::new();
    let mut deleted = BTreeSet::new();
    for step in &plan.steps {
        let Some(path) = step.target() else {
            continue;
        };
        let present = created.contains(&path) || (!deleted.contains(&path) && exists(&path));
        match step.action.parse::<ToolName>() {
            Ok(ToolName::FsWrite) if !present => {
                return Err(AgentError::PlanRejected(format!(
                    "step {} uses fs.write on '{path}', which does not exist; use fs.create",
                    step.step_id
                )));
            }
            Ok(ToolName::FsCreate) if present => {
                return Err(AgentError::PlanRejected(format!(
                    "step {} uses fs.create on '{path}', which already exists; use fs.write",
                    step.step_id
                )));
            }
            Ok(ToolName::FsCreate) => {
                deleted.remove(&path);
                created.insert(path);
            }
            Ok(ToolName::FsDelete) => {
                created.remove(&path);
                deleted.insert(path);
            }
            _ => {}
        }
    }
    Ok(())
}

/// First-cycle guard against scanning the repository.
fn check_initial_reads(plan: &Plan, max_reads: usize) -> Result<(), AgentError> {
    let mut reads: BTreeMap<String, usize> = BTreeMap::new();
    for step in &plan.steps {
        if step.action != ToolName::FsRead.as_str() {
            continue;
        }
        if let Some(path) = step.target() {
            *reads.entry(path).or_default() += 1;
        }
    }
    if let Some((path, _)) = reads.iter().find(|(_, count)| **count > 1) {
        return Err(AgentError::PlanRejected(format!(
            "'{path}' is read more than once in the first cycle"
        )));
    }
    let total: usize = reads.values().sum();
    if total > max_reads {
        return Err(AgentError::PlanRejected(format!(
            "{total} reads in the first cycle exceeds the limit of {max_reads}"
        )));
    }
    Ok(())
}
