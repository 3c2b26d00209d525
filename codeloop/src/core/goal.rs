//! Controller-owned goal check.
//!
//! Uses only observable facts from the agent state, in strict precedence:
//! errors, clarification, passing tests, step results, file modifications
//! made this cycle, and finally the working tree's dirtiness.

use crate::core::state::AgentState;
use crate::core::types::{GoalVerdict, Observation, TestStatus};

/// Decide whether the current cycle satisfied the goal.
///
/// `worktree_dirty` is `None` when the sandbox is not under version control
/// or the check could not be performed.
pub fn satisfied(state: &AgentState, worktree_dirty: Option<bool>) -> GoalVerdict {
    if let Some(error) = state.cycle_errors().first() {
        return verdict(false, format!("Errors were recorded: {}", error.message));
    }
    if state.clarification_asked {
        return verdict(false, "Clarification was requested".to_string());
    }
    if state
        .cycle_observations()
        .iter()
        .any(|obs| obs.is_test(TestStatus::Pass))
    {
        return verdict(true, "Tests passed".to_string());
    }
    if !state.step_results.is_empty() && state.step_results.values().all(|result| result.success) {
        return verdict(true, "All steps succeeded".to_string());
    }
    if state.cycle_modified_files() {
        return verdict(true, "Files modified as expected".to_string());
    }
    if worktree_dirty == Some(true) {
        return verdict(true, "Working tree has uncommitted changes".to_string());
    }
    let reason = if state
        .cycle_observations()
        .iter()
        .any(|obs| matches!(obs, Observation::FileMissing { .. }))
    {
        "A requested file does not exist"
    } else {
        "No observable progress"
    };
    verdict(false, reason.to_string())
}

fn verdict(satisfied: bool, reason: String) -> GoalVerdict {
    GoalVerdict { satisfied, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::StepResult;
    use crate::core::types::Intent;
    use crate::error::AgentError;

    fn written(path: &str) -> Observation {
        Observation::PatchApplied {
            step_id: 1,
            path: path.to_string(),
            added: 1,
            removed: 0,
        }
    }

    fn state() -> AgentState {
        let mut state = AgentState::new("goal", Intent::CodeChange, 0.9);
        state.begin_cycle();
        state
    }

    #[test]
    fn errors_take_precedence_over_passing_tests() {
        let mut state = state();
        state.record(Observation::TestResult {
            status: TestStatus::Pass,
            command: None,
        });
        state.record_error(&AgentError::Execution("boom".to_string()));
        let verdict = satisfied(&state, Some(true));
        assert!(!verdict.satisfied);
        assert!(verdict.reason.contains("boom"));
    }

    #[test]
    fn clarification_is_not_satisfied() {
        let mut state = state();
        state.clarification_asked = true;
        state.record(written("a.rs"));
        assert!(!satisfied(&state, None).satisfied);
    }

    #[test]
    fn passing_tests_beat_step_results() {
        let mut state = state();
        state.step_results.insert(
            1,
            StepResult {
                success: false,
                output: String::new(),
            },
        );
        state.record(Observation::TestResult {
            status: TestStatus::Pass,
            command: None,
        });
        assert_eq!(satisfied(&state, None).reason, "Tests passed");
    }

    #[test]
    fn file_writes_are_satisfied() {
        let mut state = state();
        state.record(written("lib/x.rb"));
        let verdict = satisfied(&state, None);
        assert!(verdict.satisfied);
        assert_eq!(verdict.reason, "Files modified as expected");
    }

    #[test]
    fn deletions_are_satisfied() {
        let mut state = state();
        state.record(Observation::FileDeleted {
            step_id: 1,
            path: "old.txt".to_string(),
        });
        assert_eq!(satisfied(&state, None).reason, "Files modified as expected");
    }

    /// Verifies a write from an earlier cycle does not satisfy a later cycle
    /// that changed nothing.
    #[test]
    fn earlier_cycle_writes_do_not_count() {
        let mut state = state();
        state.record(written("lib/x.rb"));
        state.artifacts.files_written.insert("lib/x.rb".to_string());
        state.artifacts.patches_applied = 1;
        assert!(satisfied(&state, None).satisfied);

        state.begin_cycle();
        state.step_results.insert(
            1,
            StepResult {
                success: false,
                output: "exit 1".to_string(),
            },
        );
        let verdict = satisfied(&state, None);
        assert!(!verdict.satisfied);
        assert_eq!(verdict.reason, "No observable progress");
    }

    #[test]
    fn failed_read_is_not_satisfied() {
        let mut state = state();
        state.record(Observation::FileMissing {
            step_id: 1,
            path: "missing.rb".to_string(),
        });
        state.step_results.insert(
            1,
            StepResult {
                success: false,
                output: "file not found".to_string(),
            },
        );
        let verdict = satisfied(&state, None);
        assert!(!verdict.satisfied);
        assert_eq!(verdict.reason, "A requested file does not exist");
    }

    #[test]
    fn dirty_worktree_is_the_weakest_signal() {
        let state = state();
        assert!(!satisfied(&state, Some(false)).satisfied);
        assert!(!satisfied(&state, None).satisfied);
        let verdict = satisfied(&state, Some(true));
        assert!(verdict.satisfied);
        assert_eq!(verdict.reason, "Working tree has uncommitted changes");
    }
}
