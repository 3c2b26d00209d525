//! Stable exit codes for codeloop CLI commands.

/// The task finished, or the command succeeded.
pub const OK: i32 = 0;
/// Invalid input, config or root, or an infrastructure error.
pub const INVALID: i32 = 1;
/// The task halted without verifying its goal.
pub const HALTED: i32 = 3;
