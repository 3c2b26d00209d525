//! Autonomous coding-agent control loop.
//!
//! A task is classified, then driven through cycles of planning, execution,
//! observation, reduction and decision until the goal is verified, a hard stop
//! fires, or the cycle budget runs out. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (plan model, safety policy, diffs,
//!   stagnation, goal checks, decisions). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (processes, git, patch application,
//!   model clients, config, prompts, collaborators).
//!
//! Orchestration modules ([`tools`], [`bus`], [`diff_generator`], [`planner`],
//! [`validate`], [`orchestrator`]) combine the two under the model's
//! supervision.

pub mod bus;
pub mod core;
pub mod diff_generator;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod planner;
pub mod schemas;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod validate;
