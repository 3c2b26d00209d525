//! Loop-level scenarios driving `Orchestrator::run_task` end to end.
//!
//! Each test scripts the planner's replies, runs one task against a temporary
//! sandbox, and checks the observations, decisions and files that result.

use codeloop::core::goal;
use codeloop::core::types::{DecisionBasis, ModelRole, Observation, TestStatus, Verdict};
use codeloop::io::collaborators::{InMemorySession, NoRetrieval, NoopTrace};
use codeloop::io::config::AgentConfig;
use codeloop::io::patch::BuiltinPatchApplier;
use codeloop::orchestrator::{Collaborators, Orchestrator, TaskOutcome, TaskStatus};
use codeloop::test_support::{ScriptedModel, TestRepo, test_config};
use codeloop::tools::registry::ToolRegistry;

struct Harness {
    repo: TestRepo,
    model: ScriptedModel,
    registry: ToolRegistry,
    memory: InMemorySession,
}

impl Harness {
    fn new() -> Self {
        Self {
            repo: TestRepo::new(),
            model: ScriptedModel::new(),
            registry: ToolRegistry::new().expect("registry"),
            memory: InMemorySession::new(),
        }
    }

    fn plan(&self, json: &str) {
        self.model.push(ModelRole::Planner, json);
    }

    fn run(&self, config: AgentConfig, task: &str) -> TaskOutcome {
        let applier = BuiltinPatchApplier::new(self.repo.path());
        let orchestrator = Orchestrator::new(
            self.repo.path(),
            config,
            &self.registry,
            &self.model,
            &applier,
            Collaborators {
                retriever: &NoRetrieval,
                trace: &NoopTrace,
                memory: &self.memory,
            },
        )
        .expect("orchestrator");
        orchestrator.run_task(task)
    }
}

fn kinds(outcome: &TaskOutcome) -> Vec<&'static str> {
    outcome
        .state
        .observations()
        .iter()
        .map(Observation::kind)
        .collect()
}

/// Verifies a read of a missing file is observed, not raised, and leaves the
/// goal unsatisfied.
#[test]
fn missing_file_read_is_observed_and_goal_unsatisfied() {
    let harness = Harness::new();
    harness.plan(
        r#"{"confidence": 0.9, "steps": [{"step_id": 1, "action": "fs.read", "path": "missing.rb"}]}"#,
    );
    let config = AgentConfig {
        max_cycles: 1,
        ..test_config()
    };

    let outcome = harness.run(config, "fix the greeting in missing.rb");

    assert_eq!(outcome.status, TaskStatus::Halted);
    assert!(kinds(&outcome).contains(&"FILE_MISSING"));
    assert!(outcome.state.errors().is_empty());
    let verdict = goal::satisfied(&outcome.state, None);
    assert!(!verdict.satisfied);
    assert_eq!(verdict.reason, "A requested file does not exist");
    assert!(outcome.reason.contains("max cycles"), "{}", outcome.reason);
}

/// Verifies `fs.create` writes exactly the planned content and the goal check
/// credits the modification.
#[test]
fn create_writes_exact_content() {
    let harness = Harness::new();
    harness.plan(
        r#"{"confidence": 0.9, "steps": [
            {"step_id": 1, "action": "fs.create", "path": "lib/x.rb", "content": "puts 1\n"}
        ]}"#,
    );

    let outcome = harness.run(test_config(), "create lib/x.rb printing 1");

    assert_eq!(outcome.status, TaskStatus::Done, "{}", outcome.reason);
    assert_eq!(harness.repo.read("lib/x.rb"), "puts 1\n");
    assert_eq!(outcome.reason, "Files modified as expected");
    let verdict = goal::satisfied(&outcome.state, None);
    assert!(verdict.satisfied);
    assert_eq!(verdict.reason, "Files modified as expected");
    assert!(outcome.state.artifacts.files_written.contains("lib/x.rb"));
    assert!(kinds(&outcome).contains(&"PATCH_APPLIED"));
    harness.model.assert_drained();
}

/// Verifies a destructive command is refused before anything is spawned.
#[test]
fn destructive_command_is_refused() {
    let harness = Harness::new();
    harness.plan(
        r#"{"confidence": 0.9, "steps": [{"step_id": 1, "action": "exec.run", "command": "rm -rf /"}]}"#,
    );
    let config = AgentConfig {
        max_cycles: 1,
        exec: codeloop::io::config::ExecConfig {
            allow_prefixes: vec!["rm".to_string()],
            ..Default::default()
        },
        ..test_config()
    };

    let outcome = harness.run(config, "clean the build output");

    assert_eq!(outcome.status, TaskStatus::Halted);
    assert!(
        outcome.state.errors()[0]
            .signature
            .starts_with("CommandNotAllowed"),
        "{:?}",
        outcome.state.errors()
    );
    assert_eq!(outcome.state.tool_rejections, 1);
    assert!(!kinds(&outcome).contains(&"COMMAND_RAN"));
    assert!(outcome.state.artifacts.commands_run.is_empty());
}

/// Verifies a failing test run retries and a passing one finishes the task.
#[test]
fn failing_then_passing_tests_retry_then_succeed() {
    let harness = Harness::new();
    harness.plan(
        r#"{"confidence": 0.9, "success_criteria": ["done.txt exists"], "steps": [
            {"step_id": 1, "action": "fs.create", "path": "notes.txt", "content": "started\n"}
        ]}"#,
    );
    harness.plan(
        r#"{"confidence": 0.9, "success_criteria": ["done.txt exists"], "steps": [
            {"step_id": 1, "action": "fs.create", "path": "done.txt", "content": "done\n"}
        ]}"#,
    );
    let config = AgentConfig {
        tests: codeloop::io::config::TestsConfig {
            command: Some("test -f done.txt".to_string()),
            required: true,
        },
        ..test_config()
    };

    let outcome = harness.run(config, "create done.txt");

    assert_eq!(outcome.status, TaskStatus::Done, "{}", outcome.reason);
    assert_eq!(outcome.cycles, 2);
    let verdicts: Vec<Verdict> = outcome
        .state
        .decisions
        .iter()
        .map(|decision| decision.verdict)
        .collect();
    assert_eq!(verdicts, vec![Verdict::Retry, Verdict::Success]);
    assert_eq!(outcome.state.decisions[0].basis, DecisionBasis::TestFailed);
    assert_eq!(outcome.state.decisions[1].basis, DecisionBasis::TestPassed);
    let tests: Vec<TestStatus> = outcome
        .state
        .observations()
        .iter()
        .filter_map(|obs| match obs {
            Observation::TestResult { status, .. } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(tests, vec![TestStatus::Fail, TestStatus::Pass]);
    assert_eq!(outcome.reason, "Tests passed");

    let prompts = harness.model.prompts(ModelRole::Planner);
    assert!(prompts[1].contains("Tests failed"), "feedback missing from second prompt");
}

/// Verifies the confidence floor rejects a mutating plan but not a read-only
/// plan below the floor.
#[test]
fn confidence_floor_spares_read_only_plans() {
    let harness = Harness::new();
    harness.repo.write("README.md", "# demo\n");
    harness.plan(
        r#"{"confidence": 0.4, "steps": [
            {"step_id": 1, "action": "fs.create", "path": "NOTES.md", "content": "n\n"}
        ]}"#,
    );
    harness.plan(
        r#"{"confidence": 0.3, "steps": [{"step_id": 1, "action": "fs.read", "path": "README.md"}]}"#,
    );

    let outcome = harness.run(test_config(), "check README.md");

    assert_eq!(outcome.status, TaskStatus::Done, "{}", outcome.reason);
    assert_eq!(outcome.cycles, 2);
    assert!(!harness.repo.exists("NOTES.md"));
    let rejection = outcome
        .state
        .observations()
        .iter()
        .find_map(|obs| match obs {
            Observation::PlanRejected { reason } => Some(reason.clone()),
            _ => None,
        })
        .expect("first plan rejected");
    assert!(rejection.contains("confidence"), "{rejection}");
    assert!(outcome.state.artifacts.files_read.contains("README.md"));
    assert_eq!(outcome.reason, "All steps succeeded");
}

/// Verifies a malformed planner reply is rejected with feedback and the loop
/// replans instead of treating it as an empty plan.
#[test]
fn malformed_plan_is_rejected_then_replanned() {
    let harness = Harness::new();
    harness.plan("Sure! Here is my plan: step one, create the file.");
    harness.plan(
        r#"{"confidence": 0.9, "steps": [
            {"step_id": 1, "action": "fs.create", "path": "hello.txt", "content": "hi\n"}
        ]}"#,
    );

    let outcome = harness.run(test_config(), "create hello.txt");

    assert_eq!(outcome.status, TaskStatus::Done, "{}", outcome.reason);
    assert_eq!(outcome.cycles, 2);
    assert_eq!(harness.repo.read("hello.txt"), "hi\n");
    let observed = kinds(&outcome);
    assert_eq!(observed.first(), Some(&"PLAN_REJECTED"), "{observed:?}");
    assert!(observed.contains(&"PATCH_APPLIED"));
    let errors = outcome.state.errors();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].signature.starts_with("SchemaViolation"), "{errors:?}");
    assert_eq!(errors[0].cycle, 1);
    assert_eq!(outcome.state.decisions.len(), 1);
    harness.model.assert_drained();
}

/// Verifies a planner proposing the same plan every cycle is stopped by
/// stagnation, not by the cycle budget.
#[test]
fn identical_plans_stop_on_stagnation() {
    let harness = Harness::new();
    harness.repo.write("a.txt", "a\n");
    let plan = r#"{"confidence": 0.9, "success_criteria": ["b is present"], "steps": [
        {"step_id": 1, "action": "fs.read", "path": "a.txt"},
        {"step_id": 2, "action": "fs.read", "path": "missing.txt"}
    ]}"#;
    for _ in 0..3 {
        harness.plan(plan);
    }

    let outcome = harness.run(test_config(), "inspect a.txt and missing.txt");

    assert_eq!(outcome.status, TaskStatus::Halted);
    assert!(outcome.reason.starts_with("stagnation"), "{}", outcome.reason);
    assert!(outcome.cycles < test_config().max_cycles);
}

/// Verifies a write without a prior read of the same file is rejected at
/// planning time and nothing is touched.
#[test]
fn write_without_read_is_rejected() {
    let harness = Harness::new();
    harness.repo.write("src/lib.rs", "pub fn a() {}\n");
    harness.plan(
        r#"{"confidence": 0.9, "steps": [
            {"step_id": 1, "action": "fs.write", "path": "src/lib.rs", "content": "pub fn b() {}\n"}
        ]}"#,
    );
    let config = AgentConfig {
        max_cycles: 1,
        ..test_config()
    };

    let outcome = harness.run(config, "add fn b to src/lib.rs");

    assert_eq!(outcome.status, TaskStatus::Halted);
    assert_eq!(harness.repo.read("src/lib.rs"), "pub fn a() {}\n");
    assert!(
        outcome.state.errors()[0]
            .signature
            .starts_with("DependencyUnmet"),
        "{:?}",
        outcome.state.errors()
    );
}

/// Verifies `fs.delete` removes the file and counts as a modification.
#[test]
fn delete_removes_file() {
    let harness = Harness::new();
    harness.repo.write("old.txt", "bye\n");
    harness.plan(
        r#"{"confidence": 0.9, "steps": [{"step_id": 1, "action": "fs.delete", "path": "old.txt"}]}"#,
    );

    let outcome = harness.run(test_config(), "delete old.txt");

    assert_eq!(outcome.status, TaskStatus::Done, "{}", outcome.reason);
    assert!(!harness.repo.exists("old.txt"));
    assert!(kinds(&outcome).contains(&"FILE_DELETED"));
}

/// Verifies a git sandbox with a change the agent made is still judged by
/// the controller's own checks.
#[test]
fn git_sandbox_finishes_after_change() {
    let harness = Harness::new();
    harness.repo.write("README.md", "# demo\n");
    harness.repo.init_git();
    harness.plan(
        r#"{"confidence": 0.9, "steps": [
            {"step_id": 1, "action": "fs.create", "path": "CHANGELOG.md", "content": "v1\n"},
            {"step_id": 2, "action": "git.status"}
        ]}"#,
    );

    let outcome = harness.run(test_config(), "add a CHANGELOG.md");

    assert_eq!(outcome.status, TaskStatus::Done, "{}", outcome.reason);
    let status = &outcome.state.step_results[&2];
    assert!(status.success);
    assert!(status.output.contains("CHANGELOG.md"), "{}", status.output);
}
