//! Unified diff helpers: construction, repair, validation, and in-memory
//! application.
//!
//! Everything here is deterministic. Model-produced diffs are treated as
//! untrusted text and normalized before they reach a patch applier.

use crate::error::AgentError;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";
const CONTEXT_LINES: usize = 3;

/// Parsed single-file unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// `None` when the old side is `/dev/null` (file creation).
    pub old_path: Option<String>,
    /// `None` when the new side is `/dev/null` (file deletion).
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
    pub old_missing_newline: bool,
    pub new_missing_newline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

/// Line counts for a validated diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
}

impl DiffStats {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

impl FilePatch {
    pub fn stats(&self) -> DiffStats {
        let mut stats = DiffStats::default();
        for line in self.hunks.iter().flat_map(|hunk| &hunk.lines) {
            match line {
                HunkLine::Add(_) => stats.added += 1,
                HunkLine::Remove(_) => stats.removed += 1,
                HunkLine::Context(_) => {}
            }
        }
        stats
    }

    pub fn is_creation(&self) -> bool {
        self.old_path.is_none()
    }

    pub fn is_deletion(&self) -> bool {
        self.new_path.is_none()
    }

    /// The path the patch targets, whichever side names it.
    pub fn target(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }
}

/// Remove surrounding Markdown code fences, if any.
pub fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return ensure_trailing_newline(trimmed);
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    lines.remove(0);
    if lines.last().is_some_and(|line| line.trim_start().starts_with("```")) {
        lines.pop();
    }
    ensure_trailing_newline(&lines.join("\n"))
}

/// Diff creating `path` with exactly `content`. Never consults a model.
pub fn add_file_diff(path: &str, content: &str) -> String {
    let lines = split_lines(content);
    let mut diff = format!("--- /dev/null\n+++ b/{path}\n@@ -0,0 +1,{} @@\n", lines.len());
    for line in &lines {
        diff.push('+');
        diff.push_str(line);
        diff.push('\n');
    }
    if !content.is_empty() && !content.ends_with('\n') {
        diff.push_str(NO_NEWLINE_MARKER);
        diff.push('\n');
    }
    diff
}

/// Context-only diff for `path`: applying it changes nothing.
pub fn noop_diff(path: &str, original: &str) -> String {
    let lines = split_lines(original);
    let context: Vec<&str> = lines.iter().take(CONTEXT_LINES).map(String::as_str).collect();
    let start = usize::from(!context.is_empty());
    let mut diff = format!(
        "--- a/{path}\n+++ b/{path}\n@@ -{start},{len} +{start},{len} @@\n",
        len = context.len()
    );
    for line in context {
        diff.push(' ');
        diff.push_str(line);
        diff.push('\n');
    }
    diff
}

/// True when every line of `wanted` already appears, in order and adjacent,
/// in `original`.
pub fn already_present(original: &str, wanted: &str) -> bool {
    let wanted_lines: Vec<&str> = wanted.lines().collect();
    if wanted_lines.iter().all(|line| line.trim().is_empty()) {
        return false;
    }
    let original_lines: Vec<&str> = original.lines().collect();
    original_lines
        .windows(wanted_lines.len())
        .any(|window| window == wanted_lines.as_slice())
}

pub fn has_hunk_marker(text: &str) -> bool {
    text.lines().any(|line| line.starts_with("@@"))
}

/// Turn raw model output that lacks a hunk marker into a diff.
///
/// New files become an add-file diff. For existing files the lines are
/// appended, anchored on up to three trailing lines of context.
pub fn synthesize_hunk(path: &str, original: &str, raw: &str, file_exists: bool) -> String {
    let body: Vec<&str> = raw
        .lines()
        .filter(|line| !line.starts_with("--- ") && !line.starts_with("+++ "))
        .collect();
    let all_prefixed = body
        .iter()
        .filter(|line| !line.is_empty())
        .all(|line| line.starts_with('+'));
    let added: Vec<&str> = body
        .iter()
        .map(|&line| {
            if all_prefixed {
                line.strip_prefix('+').unwrap_or(line)
            } else {
                line
            }
        })
        .collect();

    if !file_exists {
        let mut content = added.join("\n");
        content.push('\n');
        return add_file_diff(path, &content);
    }

    let original_lines = split_lines(original);
    let context_start = original_lines.len().saturating_sub(CONTEXT_LINES);
    let context = &original_lines[context_start..];
    let old_start = if context.is_empty() { 0 } else { context_start + 1 };
    let new_start = if context.is_empty() && !added.is_empty() {
        1
    } else {
        old_start
    };
    let mut diff = format!(
        "--- a/{path}\n+++ b/{path}\n@@ -{old_start},{} +{new_start},{} @@\n",
        context.len(),
        context.len() + added.len()
    );
    for line in context {
        diff.push(' ');
        diff.push_str(line);
        diff.push('\n');
    }
    for line in &added {
        diff.push('+');
        diff.push_str(line);
        diff.push('\n');
    }
    diff
}

/// Prepend `---`/`+++` headers when a diff starts directly at a hunk.
pub fn ensure_headers(path: &str, diff: &str, file_exists: bool) -> String {
    let first = diff.lines().find(|line| !line.trim().is_empty());
    if first.is_some_and(|line| line.starts_with("--- ")) {
        return diff.to_string();
    }
    let old = if file_exists {
        format!("a/{path}")
    } else {
        "/dev/null".to_string()
    };
    let body = diff
        .lines()
        .skip_while(|line| !line.starts_with("@@"))
        .collect::<Vec<_>>()
        .join("\n");
    ensure_trailing_newline(&format!("--- {old}\n+++ b/{path}\n{body}"))
}

/// Final gate before a diff reaches a patch applier.
///
/// Requires a `--- a/<path>` (or `/dev/null`) header naming `path`, at least
/// one hunk, and no more than `max_lines` lines in total.
pub fn validate(path: &str, diff: &str, max_lines: usize) -> Result<FilePatch, AgentError> {
    let invalid = |reason: String| AgentError::DiffInvalid {
        path: path.to_string(),
        reason,
    };
    let line_count = diff.lines().count();
    if line_count > max_lines {
        return Err(invalid(format!(
            "diff has {line_count} lines, above the ceiling of {max_lines}"
        )));
    }
    if !has_hunk_marker(diff) {
        return Err(invalid("missing @@ hunk marker".to_string()));
    }
    let first = diff.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let expected_old = format!("--- a/{path}");
    if first != expected_old && first != "--- /dev/null" {
        return Err(invalid(format!(
            "diff must start with '{expected_old}' or '--- /dev/null', found '{first}'"
        )));
    }
    let patch = parse(diff).map_err(invalid)?;
    if patch.target() != Some(path) {
        return Err(invalid(format!(
            "diff targets '{}' instead",
            patch.target().unwrap_or("nothing")
        )));
    }
    if let Some(old) = &patch.old_path
        && old.as_str() != path
    {
        return Err(invalid(format!("old side names '{old}'")));
    }
    Ok(patch)
}

/// Parse a single-file unified diff.
pub fn parse(diff: &str) -> Result<FilePatch, String> {
    let mut old_path = None;
    let mut new_path = None;
    let mut saw_old = false;
    let mut saw_new = false;
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut old_missing_newline = false;
    let mut new_missing_newline = false;

    for line in diff.lines() {
        if hunks.is_empty() {
            if let Some(rest) = line.strip_prefix("--- ") {
                old_path = header_path(rest, "a/");
                saw_old = true;
                continue;
            }
            if let Some(rest) = line.strip_prefix("+++ ") {
                new_path = header_path(rest, "b/");
                saw_new = true;
                continue;
            }
        }
        if line.starts_with("@@") {
            hunks.push(Hunk {
                old_start: parse_old_start(line)?,
                lines: Vec::new(),
            });
            continue;
        }
        let Some(hunk) = hunks.last_mut() else {
            continue;
        };
        if line.starts_with('\\') {
            match hunk.lines.last() {
                Some(HunkLine::Add(_)) => new_missing_newline = true,
                Some(HunkLine::Remove(_)) => old_missing_newline = true,
                Some(HunkLine::Context(_)) => {
                    old_missing_newline = true;
                    new_missing_newline = true;
                }
                None => {}
            }
            continue;
        }
        match line.chars().next() {
            Some('+') => hunk.lines.push(HunkLine::Add(line[1..].to_string())),
            Some('-') => hunk.lines.push(HunkLine::Remove(line[1..].to_string())),
            Some(' ') => hunk.lines.push(HunkLine::Context(line[1..].to_string())),
            None => hunk.lines.push(HunkLine::Context(String::new())),
            Some(_) => return Err(format!("unexpected line in hunk: '{line}'")),
        }
    }

    if !saw_old || !saw_new {
        return Err("missing ---/+++ file headers".to_string());
    }
    if hunks.is_empty() {
        return Err("no hunks".to_string());
    }
    if old_path.is_none() && new_path.is_none() {
        return Err("both sides are /dev/null".to_string());
    }
    Ok(FilePatch {
        old_path,
        new_path,
        hunks,
        old_missing_newline,
        new_missing_newline,
    })
}

/// Apply a parsed patch to `original`, returning the new content.
///
/// Hunks are located by their old-side lines, searching forward from the
/// previous hunk first and then from the start of the file.
pub fn apply(original: &str, patch: &FilePatch) -> Result<String, String> {
    let mut lines = split_lines(original);
    let mut search_from = 0usize;

    for hunk in &patch.hunks {
        let (old_lines, new_lines) = hunk_sides(hunk);
        let position = if old_lines.is_empty() {
            hunk.old_start.min(lines.len())
        } else {
            let hint = hunk.old_start.saturating_sub(1).max(search_from);
            find_lines(&lines, &old_lines, hint)
                .or_else(|| find_lines(&lines, &old_lines, 0))
                .ok_or_else(|| {
                    format!(
                        "hunk at line {} does not match the current content",
                        hunk.old_start
                    )
                })?
        };
        let end = position + old_lines.len();
        lines.splice(position..end, new_lines.iter().cloned());
        search_from = position + new_lines.len();
    }

    if lines.is_empty() {
        return Ok(String::new());
    }
    let trailing_newline = if patch.new_missing_newline {
        false
    } else if patch.old_missing_newline {
        true
    } else {
        original.is_empty() || original.ends_with('\n')
    };
    let mut updated = lines.join("\n");
    if trailing_newline {
        updated.push('\n');
    }
    Ok(updated)
}

fn hunk_sides(hunk: &Hunk) -> (Vec<String>, Vec<String>) {
    let mut old_lines = Vec::new();
    let mut new_lines = Vec::new();
    for line in &hunk.lines {
        match line {
            HunkLine::Context(text) => {
                old_lines.push(text.clone());
                new_lines.push(text.clone());
            }
            HunkLine::Remove(text) => old_lines.push(text.clone()),
            HunkLine::Add(text) => new_lines.push(text.clone()),
        }
    }
    (old_lines, new_lines)
}

fn find_lines(haystack: &[String], needle: &[String], from: usize) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&start| haystack[start..start + needle.len()] == *needle)
}

fn header_path(rest: &str, prefix: &str) -> Option<String> {
    let raw = rest.split('\t').next().unwrap_or(rest).trim();
    if raw == "/dev/null" {
        return None;
    }
    Some(raw.strip_prefix(prefix).unwrap_or(raw).to_string())
}

fn parse_old_start(header: &str) -> Result<usize, String> {
    let range = header
        .trim_start_matches('@')
        .split_whitespace()
        .find(|part| part.starts_with('-'))
        .ok_or_else(|| format!("malformed hunk header '{header}'"))?;
    let start = range[1..].split(',').next().unwrap_or("0");
    start
        .parse::<usize>()
        .map_err(|_| format!("malformed hunk header '{header}'"))
}

fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    if content.ends_with('\n') {
        lines.pop();
    }
    lines
}

fn ensure_trailing_newline(text: &str) -> String {
    let mut owned = text.to_string();
    if !owned.ends_with('\n') {
        owned.push('\n');
    }
    owned
}
