//! Top-level control loop.
//!
//! One task runs through intent classification and then cycles of
//! planning, execution, observation, reduction and decision until the goal is
//! met, a hard stop fires, or the cycle budget runs out. The loop is
//! single-threaded; cancellation is cooperative and checked before every phase
//! and every step.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::bus::{BusLimits, BusServices, ToolBus, ToolOutput};
use crate::core::classifier;
use crate::core::command_policy::CommandPolicy;
use crate::core::decision;
use crate::core::diff;
use crate::core::goal;
use crate::core::plan::{Plan, Step};
use crate::core::reduction;
use crate::core::safety::Safety;
use crate::core::stagnation::StagnationDetector;
use crate::core::state::{AgentState, StepResult};
use crate::core::types::{
    CommandResult, DecisionBasis, Intent, Observation, Phase, TestStatus, Verdict,
};
use crate::diff_generator::{DiffGenerator, EditRequest};
use crate::error::AgentError;
use crate::io::collaborators::{Retriever, SessionMemory, TraceSink, Turn};
use crate::io::config::{AgentConfig, CONFIG_DIR};
use crate::io::model::ModelClient;
use crate::io::patch::PatchApplier;
use crate::io::prompt::PromptBuilder;
use crate::planner::{PlanRequest, Planner};
use crate::schemas::ResponseSchemas;
use crate::tools::registry::ToolRegistry;
use crate::tools::{Action, PlannedAction, ToolName};
use crate::validate::{PlanCheck, PlanRules, validate_plan, write_dependency_met};

/// Heuristic intents below this confidence may be refined by the model.
const INTENT_REFINE_BELOW: f64 = 0.6;
const REPEATED_ERROR_THRESHOLD: usize = 2;
const TOOL_REJECTION_LIMIT: u32 = 2;

/// External collaborators the loop consumes.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub retriever: &'a dyn Retriever,
    pub trace: &'a dyn TraceSink,
    pub memory: &'a dyn SessionMemory,
}

/// Cooperative cancellation flag shared with whoever may interrupt a task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Done,
    Halted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Done => "done",
            TaskStatus::Halted => "halted",
        }
    }
}

/// Result of one task. The final state is handed back for inspection.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub intent: Intent,
    /// Direct answer or clarification question, when the task produced one.
    pub answer: Option<String>,
    pub reason: String,
    pub cycles: u32,
    pub state: AgentState,
}

/// What a cycle decided about the loop.
enum Next {
    Continue,
    Stop {
        status: TaskStatus,
        reason: String,
        answer: Option<String>,
    },
}

impl Next {
    fn halt(reason: impl Into<String>) -> Self {
        Next::Stop {
            status: TaskStatus::Halted,
            reason: reason.into(),
            answer: None,
        }
    }

    fn interrupted() -> Self {
        Next::halt("interrupted")
    }
}

enum Planned {
    Ready(Plan),
    Rejected,
    Finished { reason: String, answer: String },
}

/// Per-task mutable loop state.
struct TaskRun<'b> {
    state: AgentState,
    bus: ToolBus<'b>,
    detector: StagnationDetector,
    /// Rejection or decision feedback for the next planning prompt.
    feedback: Option<String>,
    summary: Option<String>,
    history: Vec<Turn>,
}

pub struct Orchestrator<'a> {
    config: AgentConfig,
    registry: &'a ToolRegistry,
    model: &'a dyn ModelClient,
    applier: &'a dyn PatchApplier,
    collaborators: Collaborators<'a>,
    safety: Safety,
    policy: CommandPolicy,
    prompts: PromptBuilder,
    schemas: ResponseSchemas,
    cancel: CancelToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        root: &Path,
        config: AgentConfig,
        registry: &'a ToolRegistry,
        model: &'a dyn ModelClient,
        applier: &'a dyn PatchApplier,
        collaborators: Collaborators<'a>,
    ) -> Result<Self> {
        config.validate()?;
        let safety = Safety::new(root, &config.sandbox.allow_globs, &config.sandbox.deny_globs)?;
        let policy = CommandPolicy::new(&config.command_prefixes());
        let prompts = PromptBuilder::new(config.prompt_budget_bytes)?;
        let schemas = ResponseSchemas::load()?;
        Ok(Self {
            config,
            registry,
            model,
            applier,
            collaborators,
            safety,
            policy,
            prompts,
            schemas,
            cancel: CancelToken::new(),
        })
    }

    /// Share an externally owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one task to a terminal phase.
    #[instrument(skip_all)]
    pub fn run_task(&self, task: &str) -> TaskOutcome {
        let memory = self.collaborators.memory;
        let history = memory.last_turns(self.config.memory_turns);
        memory.append("user", task);
        self.trace("task_started", json!({ "task": task }));

        let planner = self.planner();
        let mut guess = classifier::classify(task);
        if guess.confidence < INTENT_REFINE_BELOW && self.config.model.use_for_intent {
            guess = planner.refine_intent(task, guess);
        }
        info!(intent = guess.intent.as_str(), confidence = guess.confidence, "intent classified");
        self.trace(
            "intent_classified",
            json!({ "intent": guess.intent, "confidence": guess.confidence }),
        );

        let state = AgentState::new(task, guess.intent, guess.confidence);
        if guess.intent.is_answer_only() {
            let answer = planner.answer(task, guess.intent, &[], &history);
            return self.finish(
                state,
                TaskStatus::Done,
                format!("answered {} request directly", guess.intent.as_str()),
                Some(answer),
            );
        }

        let mut run = TaskRun {
            state,
            bus: self.bus(),
            detector: StagnationDetector::new(self.config.stagnation_window),
            feedback: None,
            summary: None,
            history,
        };
        loop {
            if let Next::Stop {
                status,
                reason,
                answer,
            } = self.cycle(&mut run, &planner)
            {
                return self.finish(run.state, status, reason, answer);
            }
        }
    }

    fn planner(&self) -> Planner<'_> {
        Planner::new(
            self.model,
            self.registry,
            &self.prompts,
            &self.schemas,
            self.config.max_review_attempts,
        )
    }

    fn bus(&self) -> ToolBus<'_> {
        ToolBus::new(
            BusServices {
                registry: self.registry,
                safety: &self.safety,
                policy: &self.policy,
                applier: self.applier,
                model: self.model,
                prompts: &self.prompts,
                schemas: &self.schemas,
            },
            BusLimits {
                exec_timeout: self.config.exec_timeout(),
                vcs_timeout: self.config.vcs_timeout(),
                output_limit_bytes: self.config.exec.output_limit_bytes,
                max_diff_lines: self.config.diff.max_lines,
            },
        )
    }

    #[instrument(skip_all, fields(cycle = run.state.cycle + 1))]
    fn cycle(&self, run: &mut TaskRun<'_>, planner: &Planner<'_>) -> Next {
        if self.cancel.is_cancelled() {
            return Next::interrupted();
        }
        run.state.phase = Phase::Planning;
        run.state.begin_cycle();
        run.bus.reset();

        let plan = match self.plan(run, planner) {
            Planned::Ready(plan) => plan,
            Planned::Finished { reason, answer } => {
                return Next::Stop {
                    status: TaskStatus::Done,
                    reason,
                    answer: Some(answer),
                };
            }
            Planned::Rejected => {
                run.summary = Some(reduction::summarize(&run.state, self.config.reduction_window));
                return self.after_rejection(run);
            }
        };

        if self.cancel.is_cancelled() {
            return Next::interrupted();
        }
        let Some(applied) = self.execute(run, &plan) else {
            return Next::interrupted();
        };

        if self.cancel.is_cancelled() {
            return Next::interrupted();
        }
        self.observe(run, &applied);

        if self.cancel.is_cancelled() {
            return Next::interrupted();
        }
        run.state.phase = Phase::Reduction;
        run.detector.record_observations(run.state.cycle_observations());
        let summary = reduction::summarize(&run.state, self.config.reduction_window);
        debug!(summary = %summary, "cycle reduced");
        run.summary = Some(summary);

        if self.cancel.is_cancelled() {
            return Next::interrupted();
        }
        self.decide(run, planner, &plan)
    }

    /// Propose and validate a plan.
    fn plan(&self, run: &mut TaskRun<'_>, planner: &Planner<'_>) -> Planned {
        let snippets = self
            .collaborators
            .retriever
            .retrieve(&run.state.goal, self.config.retrieval_limit);
        let proposal = planner.propose(&PlanRequest {
            goal: &run.state.goal,
            intent: run.state.intent,
            cycle: run.state.cycle,
            feedback: run.feedback.as_deref(),
            summary: run.summary.as_deref(),
            snippets: &snippets,
            history: &run.history,
        });
        self.trace(
            "plan_proposed",
            json!({
                "cycle": run.state.cycle,
                "steps": proposal.plan.steps.len(),
                "confidence": proposal.plan.confidence,
                "reviews": proposal.reviews,
                "parse_error": proposal.parse_error,
            }),
        );
        // Malformed replies are rejected with feedback, never run as an empty plan.
        if let Some(reason) = proposal.parse_error {
            return self.reject(run, AgentError::SchemaViolation(reason));
        }

        let plan = proposal.plan;
        if plan.is_empty() {
            if let Some(question) = plan
                .clarification
                .as_deref()
                .map(str::trim)
                .filter(|question| !question.is_empty())
            {
                run.state.clarification_asked = true;
                return Planned::Finished {
                    reason: "clarification requested".to_string(),
                    answer: question.to_string(),
                };
            }
            let answer = planner.answer(&run.state.goal, run.state.intent, &snippets, &run.history);
            return Planned::Finished {
                reason: "plan has no steps".to_string(),
                answer,
            };
        }

        run.detector.record_plan(&plan);
        let exists = |path: &str| self.safety.check(path).is_ok_and(|absolute| absolute.exists());
        let verdict = validate_plan(
            &plan,
            &PlanCheck {
                registry: self.registry,
                safety: &self.safety,
                state: &run.state,
                rules: PlanRules {
                    min_confidence: self.config.min_plan_confidence,
                    max_initial_reads: self.config.max_initial_reads,
                },
                exists: &exists,
            },
        );
        run.state.remember_plan(&plan);
        if let Err(err) = verdict {
            return self.reject(run, err);
        }

        run.feedback = None;
        run.state.plan = Some(plan.clone());
        Planned::Ready(plan)
    }

    fn reject(&self, run: &mut TaskRun<'_>, err: AgentError) -> Planned {
        warn!(kind = err.kind(), err = %err, "plan rejected");
        if err.is_tool_rejection() {
            run.state.tool_rejections += 1;
        }
        run.state.record_error(&err);
        run.state.record(Observation::PlanRejected {
            reason: err.to_string(),
        });
        self.trace(
            "plan_rejected",
            json!({ "cycle": run.state.cycle, "kind": err.kind(), "reason": err.to_string() }),
        );
        run.feedback = Some(err.to_string());
        Planned::Rejected
    }

    fn after_rejection(&self, run: &mut TaskRun<'_>) -> Next {
        run.state.phase = Phase::Decision;
        if let Some(reason) = self.hard_stop(run) {
            return Next::halt(reason);
        }
        if run.state.cycle >= self.config.max_cycles {
            let last = run.feedback.as_deref().unwrap_or("plan rejected");
            return Next::halt(format!(
                "max cycles ({}) reached; last plan rejected: {last}",
                self.config.max_cycles
            ));
        }
        Next::Continue
    }

    /// Run the plan's steps in order. Returns the diff text applied this
    /// cycle, or `None` if the task was cancelled mid-plan.
    fn execute(&self, run: &mut TaskRun<'_>, plan: &Plan) -> Option<String> {
        run.state.phase = Phase::Execution;
        let mut applied = String::new();
        for step in &plan.steps {
            if self.cancel.is_cancelled() {
                return None;
            }
            let result = self.execute_step(run, plan, step, &mut applied);
            self.trace(
                "step_finished",
                json!({
                    "cycle": run.state.cycle,
                    "step_id": step.step_id,
                    "action": step.action,
                    "error": result.as_ref().err().map(ToString::to_string),
                }),
            );
            if let Err(err) = result {
                self.record_step_error(&mut run.state, step, &err);
                break;
            }
        }
        Some(applied)
    }

    fn record_step_error(&self, state: &mut AgentState, step: &Step, err: &AgentError) {
        warn!(step_id = step.step_id, kind = err.kind(), err = %err, "step failed, skipping remaining steps");
        state.record_error(err);
        if err.is_tool_rejection() {
            state.tool_rejections += 1;
            state.record(Observation::ToolRejected {
                step_id: step.step_id,
                tool: step.action.clone(),
                reason: err.to_string(),
            });
        } else {
            state.record(Observation::ActionFailed {
                step_id: step.step_id,
                message: err.to_string(),
            });
        }
        let read_only = self
            .registry
            .fetch(&step.action)
            .is_some_and(|contract| contract.read_only);
        if read_only {
            state
                .step_results
                .entry(step.step_id)
                .or_insert_with(|| StepResult {
                    success: false,
                    output: err.to_string(),
                });
        }
    }

    #[instrument(skip_all, fields(step_id = step.step_id, action = %step.action))]
    fn execute_step(
        &self,
        run: &mut TaskRun<'_>,
        plan: &Plan,
        step: &Step,
        applied: &mut String,
    ) -> Result<(), AgentError> {
        let action = PlannedAction::from_step(step)?;
        let tool = action.tool();
        let contract = self
            .registry
            .contract(tool)
            .ok_or_else(|| AgentError::UnknownTool(tool.to_string()))?;
        if !contract.permits(Phase::Execution) {
            return Err(AgentError::ForbiddenInPhase {
                tool: tool.to_string(),
                phase: Phase::Execution.to_string(),
            });
        }
        if tool == ToolName::FsWrite && !write_dependency_met(plan, step) {
            return Err(AgentError::DependencyUnmet {
                step_id: step.step_id,
                action: step.action.clone(),
                path: step.target().unwrap_or_default(),
            });
        }

        let step_id = step.step_id;
        match action {
            PlannedAction::Read { path } => {
                let (content, exists) = read_file(&mut run.bus, &path)?;
                if exists {
                    run.state.artifacts.files_read.insert(path.clone());
                    run.state.record(Observation::FileRead {
                        step_id,
                        bytes: content.len(),
                        path,
                    });
                    run.state.step_results.insert(
                        step_id,
                        StepResult {
                            success: true,
                            output: content,
                        },
                    );
                } else {
                    debug!(path = %path, "requested file is missing");
                    run.state.step_results.insert(
                        step_id,
                        StepResult {
                            success: false,
                            output: format!("{path} does not exist"),
                        },
                    );
                    run.state.record(Observation::FileMissing { step_id, path });
                }
            }
            PlannedAction::Create { path, content } => {
                let diff_text = diff::add_file_diff(&path, &content);
                self.apply(run, step_id, &path, diff_text, true, applied)?;
            }
            PlannedAction::Write { path, content } => {
                let (original, exists) = read_file(&mut run.bus, &path)?;
                if !exists {
                    return Err(AgentError::Execution(format!(
                        "{path} does not exist; use fs.create"
                    )));
                }
                let generated =
                    DiffGenerator::new(self.model, &self.prompts, self.config.diff.max_lines)
                        .generate(&EditRequest {
                            path: &path,
                            original: &original,
                            goal: &run.state.goal,
                            reason: &step.reason,
                            content: content.as_deref(),
                            file_exists: true,
                        })?;
                if generated.noop {
                    debug!(path = %path, "edit already present, nothing to apply");
                } else {
                    self.apply(run, step_id, &path, generated.text, false, applied)?;
                }
            }
            PlannedAction::Delete { path } => {
                run.bus.invoke(
                    Phase::Execution,
                    &Action::Delete { path: path.clone() },
                )?;
                applied.push_str("deleted ");
                applied.push_str(&path);
                applied.push('\n');
                run.state.artifacts.files_deleted.insert(path.clone());
                run.state.record(Observation::FileDeleted { step_id, path });
            }
            PlannedAction::Run { command } => {
                let result = run_command(&mut run.bus, Phase::Execution, &command)?;
                run.state.artifacts.commands_run.push(command.clone());
                run.state.record(Observation::CommandRan {
                    step_id,
                    command: command.clone(),
                    exit_code: result.exit_code,
                });
                let success = !result.timed_out && step.accepts_exit_code(result.exit_code);
                run.state.step_results.insert(
                    step_id,
                    StepResult {
                        success,
                        output: command_output(&result),
                    },
                );
                if !success {
                    let message = describe_failure(&command, &result);
                    if !step.allow_failure {
                        return Err(AgentError::StepFailed { step_id, message });
                    }
                    debug!(message = %message, "failure allowed, continuing");
                }
            }
            PlannedAction::ErrorSummary { stderr } => {
                let stderr = stderr.unwrap_or_else(|| run.bus.last_stderr().to_string());
                let output = run
                    .bus
                    .invoke(Phase::Execution, &Action::ErrorSummary { stderr })?;
                let ToolOutput::Summary(summary) = output else {
                    return Err(unexpected_output(tool));
                };
                run.state.step_results.insert(
                    step_id,
                    StepResult {
                        success: true,
                        output: summary.root_cause,
                    },
                );
            }
            PlannedAction::GitStatus => git_step(run, step_id, &Action::GitStatus)?,
            PlannedAction::GitDiff { path } => git_step(run, step_id, &Action::GitDiff { path })?,
        }
        Ok(())
    }

    /// Apply a diff through the internal `fs.write_diff` primitive.
    fn apply(
        &self,
        run: &mut TaskRun<'_>,
        step_id: u32,
        path: &str,
        diff_text: String,
        created: bool,
        applied: &mut String,
    ) -> Result<(), AgentError> {
        let action = Action::WriteDiff {
            path: path.to_string(),
            diff: diff_text.clone(),
        };
        let ToolOutput::Patched { added, removed, .. } =
            run.bus.invoke(Phase::Execution, &action)?
        else {
            return Err(unexpected_output(ToolName::FsWriteDiff));
        };
        applied.push_str(&diff_text);
        let artifacts = &mut run.state.artifacts;
        artifacts.patches_applied += 1;
        artifacts.files_written.insert(path.to_string());
        run.state.record(Observation::PatchApplied {
            step_id,
            path: path.to_string(),
            added,
            removed,
        });
        run.state.record(Observation::FileWritten {
            step_id,
            path: path.to_string(),
            created,
        });
        Ok(())
    }

    /// Record what changed and run the tests if anything did.
    fn observe(&self, run: &mut TaskRun<'_>, applied: &str) {
        run.state.phase = Phase::Observation;
        if !run.bus.changes_made() {
            run.state.record(Observation::NoChanges);
            return;
        }
        run.detector.record_diff(applied);

        let tests = &self.config.tests;
        let Some(command) = tests.command.as_deref().filter(|_| tests.required) else {
            run.state.record(Observation::TestResult {
                status: TestStatus::Skip,
                command: tests.command.clone(),
            });
            return;
        };
        let status = match run_command(&mut run.bus, Phase::Observation, command) {
            Ok(result) if result.succeeded() => TestStatus::Pass,
            Ok(result) => {
                debug!(exit_code = ?result.exit_code, timed_out = result.timed_out, "tests failed");
                TestStatus::Fail
            }
            Err(err) => {
                warn!(err = %err, "test command could not run");
                run.state.record_error(&err);
                TestStatus::Fail
            }
        };
        info!(status = status.as_str(), "tests ran");
        self.trace(
            "tests_ran",
            json!({ "cycle": run.state.cycle, "status": status, "command": command }),
        );
        run.state.record(Observation::TestResult {
            status,
            command: Some(command.to_string()),
        });
    }

    fn decide(&self, run: &mut TaskRun<'_>, planner: &Planner<'_>, plan: &Plan) -> Next {
        run.state.phase = Phase::Decision;
        if let Some(reason) = self.hard_stop(run) {
            return Next::halt(reason);
        }

        let mut decision = decision::decide(
            plan,
            &run.state.step_results,
            run.state.cycle_observations(),
        );
        if self.config.model.use_for_decision && decision::model_may_override(&decision) {
            decision = planner.judge(
                &run.state.goal,
                plan,
                run.summary.as_deref().unwrap_or_default(),
                &decision,
            );
        }
        let git = run.bus.git();
        let dirty = if git.is_repository() {
            git.has_uncommitted_changes(&[CONFIG_DIR])
                .inspect_err(|err| warn!(err = %format!("{err:#}"), "git status failed"))
                .ok()
        } else {
            None
        };
        let verdict = goal::satisfied(&run.state, dirty);
        info!(
            decision = ?decision.verdict,
            basis = ?decision.basis,
            satisfied = verdict.satisfied,
            reason = %verdict.reason,
            "cycle decided"
        );
        self.trace(
            "decision",
            json!({
                "cycle": run.state.cycle,
                "decision": decision,
                "goal": verdict,
            }),
        );
        run.state.decisions.push(decision.clone());

        match decision.verdict {
            Verdict::Blocked => return Next::halt(format!("blocked: {}", decision.reason)),
            Verdict::Success if verdict.satisfied => {
                return Next::Stop {
                    status: TaskStatus::Done,
                    reason: verdict.reason,
                    answer: None,
                };
            }
            Verdict::Retry if decision.basis == DecisionBasis::Unverified && verdict.satisfied => {
                return Next::Stop {
                    status: TaskStatus::Done,
                    reason: format!("{} ({})", verdict.reason, decision.reason),
                    answer: None,
                };
            }
            _ => {}
        }

        run.feedback = Some(format!(
            "previous cycle: {}; goal check: {}",
            decision.reason, verdict.reason
        ));
        if run.state.cycle >= self.config.max_cycles {
            return Next::halt(format!(
                "max cycles ({}) reached: {}; {}",
                self.config.max_cycles, decision.reason, verdict.reason
            ));
        }
        Next::Continue
    }

    /// Terminal conditions checked before any verdict.
    fn hard_stop(&self, run: &TaskRun<'_>) -> Option<String> {
        if run.state.tool_rejections >= TOOL_REJECTION_LIMIT {
            return Some(format!(
                "{} tool rejections",
                run.state.tool_rejections
            ));
        }
        if let Some(record) = run.state.repeated_error(REPEATED_ERROR_THRESHOLD) {
            return Some(format!("repeated error: {}", record.message));
        }
        run.detector
            .stagnant()
            .map(|stream| format!("stagnation: the {} repeated", stream.as_str()))
    }

    fn finish(
        &self,
        mut state: AgentState,
        status: TaskStatus,
        reason: String,
        answer: Option<String>,
    ) -> TaskOutcome {
        state.phase = match status {
            TaskStatus::Done => Phase::Done,
            TaskStatus::Halted => Phase::Halted,
        };
        info!(status = status.as_str(), cycles = state.cycle, reason = %reason, "task finished");
        self.trace(
            "task_finished",
            json!({
                "status": status,
                "cycles": state.cycle,
                "reason": reason,
                "answer": answer,
            }),
        );
        self.collaborators
            .memory
            .append("assistant", answer.as_deref().unwrap_or(&reason));
        TaskOutcome {
            status,
            intent: state.intent,
            answer,
            reason,
            cycles: state.cycle,
            state,
        }
    }

    fn trace(&self, name: &str, payload: Value) {
        self.collaborators.trace.event(name, payload);
    }
}

fn read_file(bus: &mut ToolBus<'_>, path: &str) -> Result<(String, bool), AgentError> {
    let output = bus.invoke(
        Phase::Execution,
        &Action::Read {
            path: path.to_string(),
        },
    )?;
    let ToolOutput::File {
        content, exists, ..
    } = output
    else {
        return Err(unexpected_output(ToolName::FsRead));
    };
    Ok((content, exists))
}

fn git_step(run: &mut TaskRun<'_>, step_id: u32, action: &Action) -> Result<(), AgentError> {
    let ToolOutput::Command(result) = run.bus.invoke(Phase::Execution, action)? else {
        return Err(unexpected_output(action.tool()));
    };
    run.state.step_results.insert(
        step_id,
        StepResult {
            success: result.succeeded(),
            output: result.stdout,
        },
    );
    Ok(())
}

fn run_command(
    bus: &mut ToolBus<'_>,
    phase: Phase,
    command: &str,
) -> Result<CommandResult, AgentError> {
    let output = bus.invoke(
        phase,
        &Action::Run {
            command: command.to_string(),
        },
    )?;
    let ToolOutput::Command(result) = output else {
        return Err(unexpected_output(ToolName::ExecRun));
    };
    Ok(result)
}

fn unexpected_output(tool: ToolName) -> AgentError {
    AgentError::Execution(format!("{tool} returned an unexpected result"))
}

fn command_output(result: &CommandResult) -> String {
    match (result.stdout.trim().is_empty(), result.stderr.trim().is_empty()) {
        (_, true) => result.stdout.clone(),
        (true, false) => result.stderr.clone(),
        (false, false) => format!("{}\n{}", result.stdout, result.stderr),
    }
}

fn describe_failure(command: &str, result: &CommandResult) -> String {
    if result.timed_out {
        return format!("`{command}` timed out");
    }
    match result.exit_code {
        Some(code) => format!("`{command}` exited with code {code}"),
        None => format!("`{command}` was terminated by a signal"),
    }
}
