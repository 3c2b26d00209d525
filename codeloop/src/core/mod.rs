//! Deterministic, pure logic for the control loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod command_policy;
pub mod decision;
pub mod diagnostics;
pub mod diff;
pub mod fingerprint;
pub mod goal;
pub mod json_repair;
pub mod plan;
pub mod reduction;
pub mod safety;
pub mod stagnation;
pub mod state;
pub mod types;
