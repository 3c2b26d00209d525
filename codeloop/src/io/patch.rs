//! Patch application backends.
//!
//! Diffs reaching this module were already validated by
//! [`crate::core::diff::validate`] and their target path passed the sandbox.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::diff::{self, FilePatch};
use crate::io::process::run_command_with_timeout;

const APPLY_OUTPUT_LIMIT: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// The diff did not apply to the current content.
    Conflict(String),
}

/// Applies a single-file unified diff inside the repository root.
pub trait PatchApplier {
    fn apply(&self, patch: &FilePatch, diff_text: &str) -> Result<PatchOutcome>;
}

/// Shells out to `git apply`. Each git invocation is bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct GitPatchApplier {
    root: PathBuf,
    timeout: Duration,
}

impl GitPatchApplier {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
        }
    }

    /// Prefix of the root inside its enclosing work tree, if any.
    fn repo_prefix(&self) -> Result<Option<String>> {
        let mut cmd = Command::new("git");
        cmd.args(["rev-parse", "--show-prefix"]).current_dir(&self.root);
        let output = run_command_with_timeout(cmd, None, self.timeout, APPLY_OUTPUT_LIMIT)
            .context("git rev-parse")?;
        if output.timed_out {
            return Err(anyhow!(
                "git rev-parse timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Ok(None);
        }
        let prefix = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!prefix.is_empty()).then_some(prefix))
    }
}

impl PatchApplier for GitPatchApplier {
    #[instrument(skip_all, fields(path = patch.target().unwrap_or_default()))]
    fn apply(&self, patch: &FilePatch, diff_text: &str) -> Result<PatchOutcome> {
        // git refuses a creation diff without added lines.
        if patch.is_creation() && patch.stats().added == 0 {
            return write_empty_file(&self.root, patch);
        }

        let mut cmd = Command::new("git");
        cmd.args(["apply", "--recount", "--whitespace=nowarn"]);
        if let Some(prefix) = self.repo_prefix()? {
            cmd.arg(format!("--directory={}", prefix.trim_end_matches('/')));
        }
        cmd.arg("-").current_dir(&self.root);

        let mut input = diff_text.to_string();
        if !input.ends_with('\n') {
            input.push('\n');
        }
        let output = run_command_with_timeout(
            cmd,
            Some(input.as_bytes()),
            self.timeout,
            APPLY_OUTPUT_LIMIT,
        )
        .context("git apply")?;
        if output.timed_out {
            return Err(anyhow!(
                "git apply timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        if output.status.success() {
            debug!("patch applied");
            return Ok(PatchOutcome::Applied);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(stderr = %stderr, "git apply rejected patch");
        Ok(PatchOutcome::Conflict(if stderr.is_empty() {
            "git apply failed".to_string()
        } else {
            stderr
        }))
    }
}

/// Applies diffs in memory and writes the result. Works outside git.
#[derive(Debug, Clone)]
pub struct BuiltinPatchApplier {
    root: PathBuf,
}

impl BuiltinPatchApplier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PatchApplier for BuiltinPatchApplier {
    #[instrument(skip_all, fields(path = patch.target().unwrap_or_default()))]
    fn apply(&self, patch: &FilePatch, _diff_text: &str) -> Result<PatchOutcome> {
        let Some(target) = patch.target() else {
            return Ok(PatchOutcome::Conflict("diff names no file".to_string()));
        };
        let path = self.root.join(target);

        if patch.is_deletion() {
            if !path.is_file() {
                return Ok(PatchOutcome::Conflict(format!("{target} does not exist")));
            }
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            return Ok(PatchOutcome::Applied);
        }

        let original = if patch.is_creation() {
            if path.exists() {
                return Ok(PatchOutcome::Conflict(format!("{target} already exists")));
            }
            String::new()
        } else {
            match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(PatchOutcome::Conflict(format!("{target} does not exist")));
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("read {}", path.display()));
                }
            }
        };

        match diff::apply(&original, patch) {
            Ok(updated) => {
                write_file(&path, &updated)?;
                debug!("patch applied");
                Ok(PatchOutcome::Applied)
            }
            Err(reason) => {
                warn!(reason = %reason, "patch did not apply");
                Ok(PatchOutcome::Conflict(reason))
            }
        }
    }
}

fn write_empty_file(root: &Path, patch: &FilePatch) -> Result<PatchOutcome> {
    let Some(target) = patch.target() else {
        return Ok(PatchOutcome::Conflict("diff names no file".to_string()));
    };
    let path = root.join(target);
    if path.exists() {
        return Ok(PatchOutcome::Conflict(format!("{target} already exists")));
    }
    write_file(&path, "")?;
    Ok(PatchOutcome::Applied)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::{add_file_diff, validate};

    fn apply_text(applier: &dyn PatchApplier, path: &str, text: &str) -> PatchOutcome {
        let patch = validate(path, text, 400).expect("valid diff");
        applier.apply(&patch, text).expect("apply")
    }

    #[test]
    fn builtin_creates_files_with_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let applier = BuiltinPatchApplier::new(dir.path());
        let text = add_file_diff("lib/new.rb", "puts 1\n");
        assert_eq!(apply_text(&applier, "lib/new.rb", &text), PatchOutcome::Applied);
        let written = fs::read_to_string(dir.path().join("lib/new.rb")).expect("read");
        assert_eq!(written, "puts 1\n");
    }

    #[test]
    fn builtin_reports_conflicts() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "one\ntwo\n").expect("write");
        let applier = BuiltinPatchApplier::new(dir.path());
        let text = "--- a/a.txt\n+++ b/a.txt\n@@ -1,1 +1,1 @@\n-three\n+four\n";
        assert!(matches!(
            apply_text(&applier, "a.txt", text),
            PatchOutcome::Conflict(_)
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).expect("read"),
            "one\ntwo\n"
        );
    }

    #[test]
    fn builtin_edits_existing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "one\ntwo\n").expect("write");
        let applier = BuiltinPatchApplier::new(dir.path());
        let text = "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+2\n";
        assert_eq!(apply_text(&applier, "a.txt", text), PatchOutcome::Applied);
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).expect("read"),
            "one\n2\n"
        );
    }

    #[test]
    fn builtin_refuses_to_recreate_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "keep\n").expect("write");
        let applier = BuiltinPatchApplier::new(dir.path());
        let text = add_file_diff("a.txt", "replace\n");
        assert!(matches!(
            apply_text(&applier, "a.txt", &text),
            PatchOutcome::Conflict(_)
        ));
    }

    fn git_applier(root: &Path) -> GitPatchApplier {
        GitPatchApplier::new(root, Duration::from_secs(30))
    }

    #[test]
    fn git_creates_and_edits_files_outside_a_repository() {
        let dir = tempfile::tempdir().expect("tempdir");
        let applier = git_applier(dir.path());

        let text = add_file_diff("lib/new.rb", "puts 1\n");
        assert_eq!(apply_text(&applier, "lib/new.rb", &text), PatchOutcome::Applied);
        assert_eq!(
            fs::read_to_string(dir.path().join("lib/new.rb")).expect("read"),
            "puts 1\n"
        );

        fs::write(dir.path().join("a.txt"), "one\ntwo\n").expect("write");
        let text = "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+three\n";
        assert_eq!(apply_text(&applier, "a.txt", text), PatchOutcome::Applied);
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).expect("read"),
            "one\nthree\n"
        );
    }

    #[test]
    fn git_creates_empty_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let applier = git_applier(dir.path());
        let text = add_file_diff("empty.txt", "");
        assert_eq!(apply_text(&applier, "empty.txt", &text), PatchOutcome::Applied);
        assert_eq!(
            fs::read_to_string(dir.path().join("empty.txt")).expect("read"),
            ""
        );
        assert!(matches!(
            apply_text(&applier, "empty.txt", &text),
            PatchOutcome::Conflict(_)
        ));
    }

    #[test]
    fn git_applies_relative_to_a_subdirectory_root() {
        let repo = crate::test_support::TestRepo::new();
        repo.write("pkg/a.txt", "one\ntwo\n");
        repo.write("a.txt", "top\n");
        repo.init_git();
        let applier = git_applier(&repo.path().join("pkg"));

        let text = "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+three\n";
        assert_eq!(apply_text(&applier, "a.txt", text), PatchOutcome::Applied);
        assert_eq!(repo.read("pkg/a.txt"), "one\nthree\n");
        assert_eq!(repo.read("a.txt"), "top\n");

        let text = add_file_diff("src/new.txt", "fresh\n");
        assert_eq!(apply_text(&applier, "src/new.txt", &text), PatchOutcome::Applied);
        assert_eq!(repo.read("pkg/src/new.txt"), "fresh\n");
        assert!(!repo.exists("src/new.txt"));
    }

    #[test]
    fn git_reports_conflicting_hunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "one\ntwo\n").expect("write");
        let applier = git_applier(dir.path());
        let text = "--- a/a.txt\n+++ b/a.txt\n@@ -1,1 +1,1 @@\n-three\n+four\n";

        let PatchOutcome::Conflict(reason) = apply_text(&applier, "a.txt", text) else {
            panic!("expected a conflict");
        };
        assert!(!reason.is_empty());
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).expect("read"),
            "one\ntwo\n"
        );
    }
}
