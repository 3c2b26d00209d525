//! Narrow interfaces to the loop's external collaborators: retrieval, trace
//! sink, and session memory, plus their default implementations.
//!
//! None of these may raise into the control loop. Retrieval degrades to an
//! empty list and trace writes swallow their own failures.

use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

/// A retrieved context snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snippet {
    pub path: String,
    pub text: String,
}

pub trait Retriever {
    /// Never fails; implementations return an empty list instead.
    fn retrieve(&self, query: &str, limit: usize) -> Vec<Snippet>;
}

/// Retrieval backend used when no index is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetrieval;

impl Retriever for NoRetrieval {
    fn retrieve(&self, _query: &str, _limit: usize) -> Vec<Snippet> {
        Vec::new()
    }
}

/// Fire-and-forget event sink.
pub trait TraceSink {
    fn event(&self, name: &str, payload: Value);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrace;

impl TraceSink for NoopTrace {
    fn event(&self, _name: &str, _payload: Value) {}
}

/// Forwards trace events to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTrace;

impl TraceSink for LogTrace {
    fn event(&self, name: &str, payload: Value) {
        info!(event = name, payload = %payload, "trace");
    }
}

/// Appends one JSON object per event to a file.
#[derive(Debug, Clone)]
pub struct JsonlTrace {
    path: PathBuf,
}

impl JsonlTrace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl TraceSink for JsonlTrace {
    fn event(&self, name: &str, payload: Value) {
        let line = json!({ "event": name, "payload": payload }).to_string();
        if let Err(err) = self.append(&line) {
            warn!(err = %err, path = %self.path.display(), "failed to write trace event");
        }
    }
}

/// One remembered exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: String,
    pub text: String,
}

/// Conversation memory used only to build prompts.
pub trait SessionMemory {
    fn append(&self, role: &str, text: &str);
    fn last_turns(&self, n: usize) -> Vec<Turn>;
}

#[derive(Debug, Default)]
pub struct InMemorySession {
    turns: RefCell<Vec<Turn>>,
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionMemory for InMemorySession {
    fn append(&self, role: &str, text: &str) {
        self.turns.borrow_mut().push(Turn {
            role: role.to_string(),
            text: text.to_string(),
        });
    }

    fn last_turns(&self, n: usize) -> Vec<Turn> {
        let turns = self.turns.borrow();
        let start = turns.len().saturating_sub(n);
        turns[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_keeps_most_recent_turns() {
        let session = InMemorySession::new();
        session.append("user", "one");
        session.append("assistant", "two");
        session.append("user", "three");
        let turns = session.last_turns(2);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "two");
        assert_eq!(turns[1].text, "three");
        assert_eq!(session.last_turns(10).len(), 3);
    }

    #[test]
    fn jsonl_trace_appends_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("traces/run.jsonl");
        let trace = JsonlTrace::new(&path);
        trace.event("cycle", json!({"n": 1}));
        trace.event("halt", json!({"reason": "stagnation"}));
        let contents = fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["event"], "cycle");
        assert_eq!(first["payload"]["n"], 1);
    }

    #[test]
    fn jsonl_trace_swallows_write_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory cannot be opened for appending.
        let trace = JsonlTrace::new(dir.path());
        trace.event("cycle", json!({}));
    }

    #[test]
    fn no_retrieval_is_empty() {
        assert!(NoRetrieval.retrieve("anything", 5).is_empty());
    }
}
