//! Test helpers: a scripted model, a temporary sandbox, and plan builders.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::plan::{Plan, Step};
use crate::core::types::ModelRole;
use crate::io::config::{AgentConfig, PatchBackend, PatchConfig};
use crate::io::model::{ModelClient, ModelRequest};

/// Model double answering from per-role queues.
///
/// A query against an empty queue fails, which exercises the callers'
/// fallback paths.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: RefCell<HashMap<ModelRole, VecDeque<Result<String, String>>>>,
    prompts: RefCell<Vec<(ModelRole, String)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, role: ModelRole, text: impl Into<String>) {
        self.replies
            .borrow_mut()
            .entry(role)
            .or_default()
            .push_back(Ok(text.into()));
    }

    /// Queue a failed query for `role`.
    pub fn fail(&self, role: ModelRole, message: &str) {
        self.replies
            .borrow_mut()
            .entry(role)
            .or_default()
            .push_back(Err(message.to_string()));
    }

    /// Prompts sent to `role`, oldest first.
    pub fn prompts(&self, role: ModelRole) -> Vec<String> {
        self.prompts
            .borrow()
            .iter()
            .filter(|(sent_to, _)| *sent_to == role)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    pub fn assert_drained(&self) {
        let replies = self.replies.borrow();
        let left: Vec<(&ModelRole, usize)> = replies
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(role, queue)| (role, queue.len()))
            .collect();
        assert!(left.is_empty(), "unused scripted replies: {left:?}");
    }
}

impl ModelClient for ScriptedModel {
    fn query(&self, request: &ModelRequest<'_>) -> Result<String> {
        self.prompts
            .borrow_mut()
            .push((request.role, request.prompt.to_string()));
        let next = self
            .replies
            .borrow_mut()
            .get_mut(&request.role)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!(
                "no scripted reply for role {}",
                request.role.as_str()
            )),
        }
    }
}

/// Temporary sandbox directory.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, content).expect("write file");
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.dir.path().join(relative)).expect("read file")
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.dir.path().join(relative).exists()
    }

    /// `git init` plus one commit of whatever the sandbox holds.
    pub fn init_git(&self) {
        self.git(&["init", "-q"]);
        self.git(&["config", "user.email", "test@example.com"]);
        self.git(&["config", "user.name", "Test"]);
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "--allow-empty", "-m", "init"]);
    }

    fn git(&self, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.dir.path())
            .status()
            .expect("spawn git");
        assert!(status.success(), "git {args:?} failed");
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Config for loop tests: no reviewer round-trips, in-process patching.
pub fn test_config() -> AgentConfig {
    AgentConfig {
        max_review_attempts: 0,
        patch: PatchConfig {
            backend: PatchBackend::Builtin,
        },
        ..AgentConfig::default()
    }
}

/// Plan with the given steps, confident and without success criteria.
pub fn plan(steps: Vec<Step>) -> Plan {
    Plan {
        plan_id: "test-plan".to_string(),
        goal: "test goal".to_string(),
        assumptions: Vec::new(),
        steps,
        success_criteria: Vec::new(),
        rollback_strategy: String::new(),
        confidence: 0.9,
        clarification: None,
    }
}

/// Bare step with no arguments.
pub fn step(step_id: u32, action: &str) -> Step {
    Step {
        step_id,
        action: action.to_string(),
        path: None,
        command: None,
        content: None,
        accepted_exit_codes: Vec::new(),
        allow_failure: false,
        reason: String::new(),
        depends_on: Vec::new(),
    }
}

pub fn read_step(step_id: u32, path: &str) -> Step {
    Step {
        path: Some(path.to_string()),
        ..step(step_id, "fs.read")
    }
}

pub fn create_step(step_id: u32, path: &str, content: &str) -> Step {
    Step {
        path: Some(path.to_string()),
        content: Some(content.to_string()),
        ..step(step_id, "fs.create")
    }
}

pub fn write_step(step_id: u32, path: &str, content: &str, depends_on: &[u32]) -> Step {
    Step {
        path: Some(path.to_string()),
        content: Some(content.to_string()),
        depends_on: depends_on.to_vec(),
        ..step(step_id, "fs.write")
    }
}

pub fn delete_step(step_id: u32, path: &str) -> Step {
    Step {
        path: Some(path.to_string()),
        ..step(step_id, "fs.delete")
    }
}

pub fn run_step(step_id: u32, command: &str) -> Step {
    Step {
        command: Some(command.to_string()),
        ..step(step_id, "exec.run")
    }
}
