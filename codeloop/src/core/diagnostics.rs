//! Error-summary grounding rules.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub root_cause: String,
    pub confidence: f64,
}

/// Summary built from the stderr text alone.
///
/// Picks the first line mentioning an error, else the first non-empty line.
pub fn fallback_summary(stderr: &str) -> ErrorSummary {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let picked = lines
        .iter()
        .find(|line| {
            let lower = line.to_ascii_lowercase();
            lower.contains("error") || lower.contains("panicked") || lower.contains("failed")
        })
        .or_else(|| lines.first());
    match picked {
        Some(line) => ErrorSummary {
            root_cause: (*line).to_string(),
            confidence: 0.3,
        },
        None => ErrorSummary {
            root_cause: "no error output was captured".to_string(),
            confidence: 0.0,
        },
    }
}

/// A model summary is grounded when it shares at least one substantive word
/// with the stderr it claims to summarize.
pub fn is_grounded(summary: &ErrorSummary, stderr: &str) -> bool {
    let haystack = stderr.to_ascii_lowercase();
    summary
        .root_cause
        .split(|ch: char| !ch.is_alphanumeric() && ch != '_')
        .filter(|word| word.len() >= 4)
        .any(|word| haystack.contains(&word.to_ascii_lowercase()))
}
