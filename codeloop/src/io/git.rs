//! Git adapter for the read-only VCS tools and the goal check.
//!
//! Only inspection commands are issued here. Patches go through
//! [`crate::io::patch`].

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::types::CommandResult;
use crate::error::AgentError;
use crate::io::process::{CommandOutput, run_command_with_timeout};

const OUTPUT_LIMIT: usize = 1024 * 1024;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
///
/// Every invocation is bounded by `timeout`; a git that hangs (lock contention,
/// a credential prompt) surfaces as an error.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    /// True when the working directory is inside a git work tree.
    ///
    /// A missing `git` binary counts as "not a repository".
    #[instrument(skip_all)]
    pub fn is_repository(&self) -> bool {
        match self.run(&["rev-parse", "--is-inside-work-tree"]) {
            Ok(output) => {
                output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true"
            }
            Err(err) => {
                debug!(err = %err, "git unavailable");
                false
            }
        }
    }

    fn require_repository(&self) -> Result<(), AgentError> {
        if self.is_repository() {
            Ok(())
        } else {
            Err(AgentError::NotARepository(
                self.workdir.display().to_string(),
            ))
        }
    }

    /// `git status --porcelain` as a tool result.
    pub fn status(&self) -> Result<CommandResult, AgentError> {
        self.require_repository()?;
        self.tool_result(&["status", "--porcelain=v1", "-uall"])
    }

    /// `git diff` as a tool result, optionally restricted to one path.
    pub fn diff(&self, path: Option<&str>) -> Result<CommandResult, AgentError> {
        self.require_repository()?;
        match path {
            Some(path) => self.tool_result(&["diff", "--", path]),
            None => self.tool_result(&["diff"]),
        }
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True if the worktree has changes outside the ignored prefixes.
    #[instrument(skip_all)]
    pub fn has_uncommitted_changes(&self, ignored_prefixes: &[&str]) -> Result<bool> {
        let dirty = self
            .status_porcelain()?
            .into_iter()
            .any(|entry| !ignored_prefixes.iter().any(|p| entry.path.starts_with(p)));
        debug!(dirty, "worktree status");
        Ok(dirty)
    }

    fn tool_result(&self, args: &[&str]) -> Result<CommandResult, AgentError> {
        let output = self
            .run(args)
            .map_err(|err| AgentError::Execution(format!("{err:#}")))?;
        Ok(output.into_result("git"))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, None, self.timeout, OUTPUT_LIMIT)
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if output.timed_out {
            return Err(anyhow!(
                "git {} timed out after {}s",
                args.join(" "),
                self.timeout.as_secs()
            ));
        }
        Ok(output)
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn plain_directory_is_not_a_repository() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = Git::new(dir.path(), Duration::from_secs(10));
        assert!(!git.is_repository());
        assert!(matches!(
            git.status().unwrap_err(),
            AgentError::NotARepository(_)
        ));
    }

    #[test]
    fn status_reports_untracked_files_in_a_repository() {
        let repo = crate::test_support::TestRepo::new();
        repo.write("README.md", "# demo\n");
        repo.init_git();
        repo.write("notes.txt", "n\n");
        let git = Git::new(repo.path(), Duration::from_secs(10));

        assert!(git.is_repository());
        let result = git.status().expect("status");
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("?? notes.txt"), "{}", result.stdout);
        assert!(git.has_uncommitted_changes(&[]).expect("dirty check"));
        assert!(!git.has_uncommitted_changes(&["notes"]).expect("dirty check"));
    }

    #[test]
    fn git_past_its_timeout_is_an_error() {
        let repo = crate::test_support::TestRepo::new();
        repo.init_git();
        let git = Git::new(repo.path(), Duration::ZERO);

        let err = git.status_porcelain().unwrap_err();
        assert!(err.to_string().contains("timed out after 0s"), "{err:#}");
        assert!(!git.is_repository());
    }
}
