//! Compact cycle summary fed back into the next planning prompt.

use crate::core::state::AgentState;

const RECENT_ERRORS: usize = 3;

/// Collapse the newest `window` observations plus artifact counts into text.
///
/// Full history stays in the state; this bounds what the planner sees.
pub fn summarize(state: &AgentState, window: usize) -> String {
    let artifacts = &state.artifacts;
    let mut out = format!(
        "cycle {} | files read: {}, files written: {}, files deleted: {}, patches applied: {}, commands run: {}, tool rejections: {}\n",
        state.cycle,
        artifacts.files_read.len(),
        artifacts.files_written.len(),
        artifacts.files_deleted.len(),
        artifacts.patches_applied,
        artifacts.commands_run.len(),
        state.tool_rejections,
    );

    let observations = state.observations();
    let skipped = observations.len().saturating_sub(window);
    if observations.is_empty() {
        out.push_str("recent observations: none\n");
    } else {
        out.push_str("recent observations:\n");
        if skipped > 0 {
            out.push_str(&format!("- ({skipped} earlier observations omitted)\n"));
        }
        for obs in &observations[skipped..] {
            out.push_str("- ");
            out.push_str(&obs.describe());
            out.push('\n');
        }
    }

    let errors = state.errors();
    if !errors.is_empty() {
        out.push_str("recent errors:\n");
        for record in &errors[errors.len().saturating_sub(RECENT_ERRORS)..] {
            out.push_str(&format!("- cycle {}: {}\n", record.cycle, record.message));
        }
    }
    out
}
