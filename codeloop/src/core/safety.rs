//! Textual path sandbox.
//!
//! Decides whether a relative path may be read, written, or deleted. Paths are
//! resolved lexically against the sandbox root; symlinks are not followed.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use regex::Regex;

use crate::error::AgentError;

/// System directories that are never writable, even if the sandbox root sits
/// below one of them.
pub const SYSTEM_DENYLIST: &[&str] = &[
    "/etc",
    "/usr",
    "/var",
    "/bin",
    "/sbin",
    "/boot",
    "/dev",
    "/proc",
    "/sys",
    "/lib",
    "/lib64",
    "/System",
    "/private/etc",
    "/private/var",
];

/// Per-user temporary directories under a denied system directory. Sandbox
/// roots inside these are allowed.
pub const TEMP_ROOTS: &[&str] = &[
    "/var/tmp",
    "/var/folders",
    "/private/var/tmp",
    "/private/var/folders",
];

static DRIVE_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:").expect("valid regex"));

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
pub struct Safety {
    root: PathBuf,
    allow: Vec<Pattern>,
    deny: Vec<Pattern>,
}

impl Safety {
    /// Build a policy for `root` with allow/deny globs matched against the
    /// normalized relative path.
    pub fn new(root: &Path, allow_globs: &[String], deny_globs: &[String]) -> Result<Self> {
        let root = std::path::absolute(root)
            .with_context(|| format!("resolve sandbox root {}", root.display()))?;
        Ok(Self {
            root: lexical_clean(&root),
            allow: compile_globs(allow_globs)?,
            deny: compile_globs(deny_globs)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allowed(&self, relative_path: &str) -> bool {
        self.check(relative_path).is_ok()
    }

    /// Resolve `relative_path` under the root, or explain why it is refused.
    pub fn check(&self, relative_path: &str) -> Result<PathBuf, AgentError> {
        let reject = |reason: &str| AgentError::PathNotAllowed {
            path: relative_path.to_string(),
            reason: reason.to_string(),
        };

        let raw = relative_path.trim();
        if raw.is_empty() {
            return Err(reject("empty path"));
        }
        if raw.contains('\0') {
            return Err(reject("path contains a NUL byte"));
        }
        let raw = raw.replace('\\', "/");
        if raw.starts_with('/') {
            return Err(reject("absolute paths are not allowed"));
        }
        if raw.starts_with('~') {
            return Err(reject("home-relative paths are not allowed"));
        }
        if DRIVE_LETTER.is_match(&raw) {
            return Err(reject("drive-letter paths are not allowed"));
        }
        if raw == ".." || raw.starts_with("../") {
            return Err(reject("path starts above the sandbox root"));
        }

        let relative =
            normalize_components(&raw).ok_or_else(|| reject("path escapes the sandbox root"))?;
        if relative.is_empty() {
            return Err(reject("path resolves to the sandbox root itself"));
        }

        let absolute = self.root.join(&relative);
        if !absolute.starts_with(&self.root) {
            return Err(reject("path escapes the sandbox root"));
        }
        if let Some(dir) = system_directory(&absolute) {
            return Err(AgentError::PathNotAllowed {
                path: relative_path.to_string(),
                reason: format!("resolves under system directory {dir}"),
            });
        }

        if !self
            .allow
            .iter()
            .any(|pattern| pattern.matches_with(&relative, GLOB_OPTIONS))
        {
            return Err(reject("path matches no allow glob"));
        }
        if let Some(pattern) = self
            .deny
            .iter()
            .find(|pattern| pattern.matches_with(&relative, GLOB_OPTIONS))
        {
            return Err(AgentError::PathNotAllowed {
                path: relative_path.to_string(),
                reason: format!("path matches deny glob '{}'", pattern.as_str()),
            });
        }

        Ok(absolute)
    }
}

/// The denied system directory `absolute` falls under, unless it is inside
/// one of the temp roots.
fn system_directory(absolute: &Path) -> Option<&'static str> {
    if TEMP_ROOTS.iter().any(|dir| absolute.starts_with(dir)) {
        return None;
    }
    SYSTEM_DENYLIST
        .iter()
        .find(|dir| absolute.starts_with(dir))
        .copied()
}

fn compile_globs(globs: &[String]) -> Result<Vec<Pattern>> {
    globs
        .iter()
        .map(|glob| Pattern::new(glob).with_context(|| format!("invalid glob '{glob}'")))
        .collect()
}

/// Resolve `.` and `..` segments. Returns `None` if `..` climbs above the start.
fn normalize_components(raw: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}
