//! Deterministic intent classification of the incoming task.
//!
//! Keyword rules only. Low-confidence results may be refined by a model query
//! in the planner; the heuristic result stands whenever that query fails.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Intent;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentGuess {
    pub intent: Intent,
    pub confidence: f64,
}

static DESTRUCTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(rm\s+-rf\s+/|format\s+(the\s+)?(hard\s+)?(disk|drive)|wipe\s+(the\s+)?(disk|system|machine)|delete\s+(every|all)\s*(thing|files)|fork\s*bomb|drop\s+all\s+databases)",
    )
    .expect("valid regex")
});

static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(hi|hello|hey|thanks|thank you|good (morning|afternoon|evening))\b[\s!.?]*$")
        .expect("valid regex")
});

static QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(what|why|how|explain|describe|tell me|can you explain|where is|who)\b")
        .expect("valid regex")
});

static CHANGE_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(add|create|write|fix|implement|refactor|update|change|rename|remove|delete|replace|insert|modify|make|move|bump|generate)\b",
    )
    .expect("valid regex")
});

static INVESTIGATE_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(find|search|check|run|investigate|debug|diagnose|list|show|inspect|locate|test)\b")
        .expect("valid regex")
});

pub fn classify(task: &str) -> IntentGuess {
    let task = task.trim();
    if task.is_empty() {
        return guess(Intent::General, 0.5);
    }
    if DESTRUCTIVE.is_match(task) {
        return guess(Intent::Reject, 0.95);
    }
    if GREETING.is_match(task) {
        return guess(Intent::General, 0.9);
    }
    let changes = CHANGE_VERB.is_match(task);
    if QUESTION.is_match(task) && !changes {
        return guess(Intent::Explanation, 0.8);
    }
    if changes {
        return guess(Intent::CodeChange, 0.8);
    }
    if INVESTIGATE_VERB.is_match(task) {
        return guess(Intent::Investigate, 0.7);
    }
    guess(Intent::CodeChange, 0.4)
}

fn guess(intent: Intent, confidence: f64) -> IntentGuess {
    IntentGuess { intent, confidence }
}
