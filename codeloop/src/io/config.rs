//! Agent configuration stored under `<root>/.codeloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const CONFIG_DIR: &str = ".codeloop";
pub const CONFIG_FILE: &str = "config.toml";

/// Agent configuration (TOML).
///
/// Missing fields default to the values below, so an absent file is a valid
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Upper bound on planning cycles per task.
    pub max_cycles: u32,
    /// Upper bound on reviewer round-trips per proposed plan.
    pub max_review_attempts: u32,
    /// Plans below this confidence are rejected unless every step is read-only.
    pub min_plan_confidence: f64,
    /// First-cycle ceiling on `fs.read` steps.
    pub max_initial_reads: usize,
    pub stagnation_window: usize,
    /// Observations kept verbatim in the reduction summary.
    pub reduction_window: usize,
    pub retrieval_limit: usize,
    pub memory_turns: usize,
    pub prompt_budget_bytes: usize,

    pub sandbox: SandboxConfig,
    pub exec: ExecConfig,
    pub tests: TestsConfig,
    pub diff: DiffConfig,
    pub patch: PatchConfig,
    pub vcs: VcsConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub allow_globs: Vec<String>,
    pub deny_globs: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allow_globs: vec!["**".to_string()],
            deny_globs: vec![".git/**".to_string(), ".codeloop/**".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecConfig {
    /// Command prefixes `exec.run` accepts. Empty means nothing is allowed.
    pub allow_prefixes: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            allow_prefixes: Vec::new(),
            timeout_secs: 120,
            output_limit_bytes: 32 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    /// Test command run after a cycle that changed files (e.g. `cargo test`).
    pub command: Option<String>,
    pub required: bool,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: None,
            required: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiffConfig {
    pub max_lines: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self { max_lines: 400 }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchBackend {
    #[default]
    Git,
    Builtin,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PatchConfig {
    pub backend: PatchBackend,
}

/// Limits for the `git` invocations behind `git.status`, `git.diff` and the
/// git patch backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VcsConfig {
    pub timeout_secs: u64,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Command receiving the prompt on stdin (e.g. `["codex","exec","-"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Let the model override unverified deterministic decisions.
    pub use_for_decision: bool,
    /// Let the model refine low-confidence intent classification.
    pub use_for_intent: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string(), "-".to_string()],
            timeout_secs: 300,
            output_limit_bytes: 200_000,
            use_for_decision: false,
            use_for_intent: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_cycles: 6,
            max_review_attempts: 2,
            min_plan_confidence: 0.5,
            max_initial_reads: 8,
            stagnation_window: 5,
            reduction_window: 10,
            retrieval_limit: 5,
            memory_turns: 6,
            prompt_budget_bytes: 48_000,
            sandbox: SandboxConfig::default(),
            exec: ExecConfig::default(),
            tests: TestsConfig::default(),
            diff: DiffConfig::default(),
            patch: PatchConfig::default(),
            vcs: VcsConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_cycles == 0 {
            return Err(anyhow!("max_cycles must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.min_plan_confidence) {
            return Err(anyhow!("min_plan_confidence must be within 0..=1"));
        }
        if self.max_initial_reads == 0 {
            return Err(anyhow!("max_initial_reads must be > 0"));
        }
        if self.stagnation_window < 5 {
            return Err(anyhow!("stagnation_window must be >= 5"));
        }
        if self.reduction_window == 0 {
            return Err(anyhow!("reduction_window must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.exec.timeout_secs == 0 {
            return Err(anyhow!("exec.timeout_secs must be > 0"));
        }
        if self.exec.output_limit_bytes == 0 {
            return Err(anyhow!("exec.output_limit_bytes must be > 0"));
        }
        if self.diff.max_lines == 0 {
            return Err(anyhow!("diff.max_lines must be > 0"));
        }
        if self.vcs.timeout_secs == 0 {
            return Err(anyhow!("vcs.timeout_secs must be > 0"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self
            .tests
            .command
            .as_deref()
            .is_some_and(|command| command.trim().is_empty())
        {
            return Err(anyhow!("tests.command must not be blank"));
        }
        for pattern in self.sandbox.allow_globs.iter().chain(&self.sandbox.deny_globs) {
            glob::Pattern::new(pattern)
                .with_context(|| format!("invalid sandbox glob '{pattern}'"))?;
        }
        Ok(())
    }

    /// Allowed `exec.run` prefixes, including the test command's program.
    pub fn command_prefixes(&self) -> Vec<String> {
        let mut prefixes = self.exec.allow_prefixes.clone();
        if let Some(program) = self
            .tests
            .command
            .as_deref()
            .and_then(|command| command.split_whitespace().next())
            && !prefixes.iter().any(|prefix| prefix == program)
        {
            prefixes.push(program.to_string());
        }
        prefixes
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec.timeout_secs)
    }

    pub fn vcs_timeout(&self) -> Duration {
        Duration::from_secs(self.vcs.timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model.timeout_secs)
    }
}

/// Default config location for a sandbox root.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = config_path(temp.path());
        let mut cfg = AgentConfig::default();
        cfg.tests.command = Some("cargo test".to_string());
        cfg.patch.backend = PatchBackend::Builtin;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_cycles = 3\n[exec]\nallow_prefixes = [\"cargo\"]\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_cycles, 3);
        assert_eq!(cfg.exec.allow_prefixes, vec!["cargo".to_string()]);
        assert_eq!(cfg.exec.timeout_secs, 120);
        assert_eq!(cfg.diff.max_lines, 400);
    }

    #[test]
    fn rejects_small_stagnation_window() {
        let cfg = AgentConfig {
            stagnation_window: 2,
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn vcs_timeout_is_configurable_and_nonzero() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[vcs]\ntimeout_secs = 5\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.vcs_timeout(), Duration::from_secs(5));
        assert_eq!(AgentConfig::default().vcs_timeout(), Duration::from_secs(30));

        fs::write(&path, "[vcs]\ntimeout_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("vcs.timeout_secs"), "{err:#}");
    }

    #[test]
    fn rejects_bad_globs() {
        let mut cfg = AgentConfig::default();
        cfg.sandbox.deny_globs.push("[".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_program_is_an_implicit_prefix() {
        let mut cfg = AgentConfig::default();
        cfg.exec.allow_prefixes = vec!["ls".to_string()];
        cfg.tests.command = Some("cargo test --quiet".to_string());
        assert_eq!(
            cfg.command_prefixes(),
            vec!["ls".to_string(), "cargo".to_string()]
        );
    }
}
