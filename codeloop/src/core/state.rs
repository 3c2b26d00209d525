//! Mutable per-task agent state.
//!
//! Owned exclusively by the orchestrator for one task. Observations and errors
//! are append-only: callers can read them but only ever push new records.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::plan::Plan;
use crate::core::types::{Decision, Intent, Observation, Phase};
use crate::error::AgentError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Artifacts {
    pub files_read: BTreeSet<String>,
    pub files_written: BTreeSet<String>,
    pub files_deleted: BTreeSet<String>,
    pub patches_applied: u32,
    pub commands_run: Vec<String>,
}

impl Artifacts {
    /// Compact progress marker; changes whenever any artifact counter moves.
    pub fn progress_marker(&self) -> String {
        format!(
            "r{}:w{}:d{}:p{}:c{}",
            self.files_read.len(),
            self.files_written.len(),
            self.files_deleted.len(),
            self.patches_applied,
            self.commands_run.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub signature: String,
    pub message: String,
    pub cycle: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub success: bool,
    pub output: String,
}

/// A plan that was proposed, with the progress marker at that time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanAttempt {
    pub fingerprint: String,
    pub progress: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub goal: String,
    pub phase: Phase,
    pub cycle: u32,
    pub intent: Intent,
    pub intent_confidence: f64,
    pub plan: Option<Plan>,
    observations: Vec<Observation>,
    errors: Vec<ErrorRecord>,
    pub artifacts: Artifacts,
    pub tool_rejections: u32,
    pub plan_fingerprints: Vec<PlanAttempt>,
    pub clarification_asked: bool,
    /// Outcomes of non-mutating steps in the current cycle's plan. File
    /// mutations are evidenced by the cycle's observations instead.
    pub step_results: BTreeMap<u32, StepResult>,
    pub decisions: Vec<Decision>,
    cycle_observation_start: usize,
    cycle_error_start: usize,
}

impl AgentState {
    pub fn new(goal: &str, intent: Intent, intent_confidence: f64) -> Self {
        Self {
            goal: goal.to_string(),
            phase: Phase::Planning,
            cycle: 0,
            intent,
            intent_confidence,
            plan: None,
            observations: Vec::new(),
            errors: Vec::new(),
            artifacts: Artifacts::default(),
            tool_rejections: 0,
            plan_fingerprints: Vec::new(),
            clarification_asked: false,
            step_results: BTreeMap::new(),
            decisions: Vec::new(),
            cycle_observation_start: 0,
            cycle_error_start: 0,
        }
    }

    /// Start a new planning cycle. Step results are plan-scoped and reset.
    pub fn begin_cycle(&mut self) {
        self.cycle += 1;
        self.plan = None;
        self.step_results.clear();
        self.cycle_observation_start = self.observations.len();
        self.cycle_error_start = self.errors.len();
    }

    pub fn record(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Observations recorded since the current cycle began.
    pub fn cycle_observations(&self) -> &[Observation] {
        &self.observations[self.cycle_observation_start..]
    }

    /// True if this cycle wrote, patched or deleted a file.
    pub fn cycle_modified_files(&self) -> bool {
        self.cycle_observations()
            .iter()
            .any(Observation::is_modification)
    }

    pub fn record_error(&mut self, error: &AgentError) {
        self.errors.push(ErrorRecord {
            signature: error.signature(),
            message: error.to_string(),
            cycle: self.cycle,
        });
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn cycle_errors(&self) -> &[ErrorRecord] {
        &self.errors[self.cycle_error_start..]
    }

    /// First error signature recorded at least `threshold` times.
    pub fn repeated_error(&self, threshold: usize) -> Option<&ErrorRecord> {
        self.errors.iter().find(|record| {
            self.errors
                .iter()
                .filter(|other| other.signature == record.signature)
                .count()
                >= threshold
        })
    }

    pub fn remember_plan(&mut self, plan: &Plan) {
        self.plan_fingerprints.push(PlanAttempt {
            fingerprint: plan.fingerprint(),
            progress: self.artifacts.progress_marker(),
        });
    }

    /// True if this plan shape was already tried and nothing has moved since.
    pub fn repeats_without_progress(&self, plan: &Plan) -> bool {
        let fingerprint = plan.fingerprint();
        let progress = self.artifacts.progress_marker();
        self.plan_fingerprints
            .iter()
            .any(|attempt| attempt.fingerprint == fingerprint && attempt.progress == progress)
    }
}
