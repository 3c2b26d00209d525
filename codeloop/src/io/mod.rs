//! Side-effecting adapters: processes, git, patches, models, config, prompts,
//! and the loop's external collaborators.

pub mod collaborators;
pub mod config;
pub mod git;
pub mod model;
pub mod patch;
pub mod process;
pub mod prompt;
