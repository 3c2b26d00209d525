//! Repetition detection across cycles.
//!
//! Three fingerprint streams are kept: the diff text produced by a cycle, the
//! structural fingerprint of each proposed plan, and the sequence of
//! observation kinds (with subjects) a cycle recorded. The loop is stagnant as
//! soon as the two newest entries of any stream are equal.

use std::collections::VecDeque;

use crate::core::fingerprint::digest;
use crate::core::plan::Plan;
use crate::core::types::Observation;

pub const MIN_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Diff,
    Plan,
    Observations,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Diff => "working-tree diff",
            Stream::Plan => "plan",
            Stream::Observations => "observation sequence",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StagnationDetector {
    window: usize,
    diffs: VecDeque<String>,
    plans: VecDeque<String>,
    observations: VecDeque<String>,
}

impl StagnationDetector {
    /// Retain the last `window` fingerprints per stream (at least five).
    pub fn new(window: usize) -> Self {
        let window = window.max(MIN_WINDOW);
        Self {
            window,
            diffs: VecDeque::with_capacity(window),
            plans: VecDeque::with_capacity(window),
            observations: VecDeque::with_capacity(window),
        }
    }

    pub fn record_diff(&mut self, diff_text: &str) {
        push_bounded(&mut self.diffs, digest(diff_text), self.window);
    }

    pub fn record_plan(&mut self, plan: &Plan) {
        push_bounded(&mut self.plans, plan.fingerprint(), self.window);
    }

    pub fn record_observations(&mut self, observations: &[Observation]) {
        let sequence: Vec<String> = observations
            .iter()
            .map(|obs| match obs.subject() {
                Some(subject) => format!("{}:{}", obs.kind(), subject),
                None => obs.kind().to_string(),
            })
            .collect();
        push_bounded(&mut self.observations, digest(&sequence.join("\n")), self.window);
    }

    /// The first stream whose two newest fingerprints match.
    pub fn stagnant(&self) -> Option<Stream> {
        [
            (Stream::Diff, &self.diffs),
            (Stream::Plan, &self.plans),
            (Stream::Observations, &self.observations),
        ]
        .into_iter()
        .find(|(_, entries)| repeats(entries))
        .map(|(stream, _)| stream)
    }
}

fn push_bounded(entries: &mut VecDeque<String>, fingerprint: String, window: usize) {
    if entries.len() == window {
        entries.pop_front();
    }
    entries.push_back(fingerprint);
}

fn repeats(entries: &VecDeque<String>) -> bool {
    let mut newest = entries.iter().rev();
    match (newest.next(), newest.next()) {
        (Some(last), Some(previous)) => last == previous,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestStatus;
    use crate::test_support::{plan, read_step};

    const DIFF_A: &str = "--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n";
    const DIFF_B: &str = "--- a/x\n+++ b/x\n@@ -1 +1 @@\n-b\n+c\n";

    #[test]
    fn identical_consecutive_diffs_are_stagnant() {
        let mut detector = StagnationDetector::new(5);
        detector.record_diff(DIFF_A);
        assert_eq!(detector.stagnant(), None);
        detector.record_diff(DIFF_A);
        assert_eq!(detector.stagnant(), Some(Stream::Diff));
    }

    #[test]
    fn different_diffs_are_not_stagnant() {
        let mut detector = StagnationDetector::new(5);
        detector.record_diff(DIFF_A);
        detector.record_diff(DIFF_B);
        assert_eq!(detector.stagnant(), None);
    }

    #[test]
    fn only_the_two_newest_entries_matter() {
        let mut detector = StagnationDetector::new(5);
        detector.record_diff(DIFF_A);
        detector.record_diff(DIFF_B);
        detector.record_diff(DIFF_A);
        assert_eq!(detector.stagnant(), None);
    }

    #[test]
    fn repeated_plan_shape_is_stagnant() {
        let mut detector = StagnationDetector::new(5);
        let mut first = plan(vec![read_step(1, "a.rs")]);
        first.goal = "look".to_string();
        let mut second = first.clone();
        second.goal = "look again".to_string();
        detector.record_plan(&first);
        detector.record_plan(&second);
        assert_eq!(detector.stagnant(), Some(Stream::Plan));
    }

    #[test]
    fn observation_sequences_compare_kinds_and_subjects() {
        let mut detector = StagnationDetector::new(5);
        let fail = [Observation::TestResult {
            status: TestStatus::Fail,
            command: None,
        }];
        let pass = [Observation::TestResult {
            status: TestStatus::Pass,
            command: None,
        }];
        detector.record_observations(&fail);
        detector.record_observations(&pass);
        assert_eq!(detector.stagnant(), None);
        detector.record_observations(&pass);
        assert_eq!(detector.stagnant(), Some(Stream::Observations));
    }

    #[test]
    fn window_never_drops_below_minimum() {
        let mut detector = StagnationDetector::new(1);
        for index in 0..10 {
            detector.record_diff(&format!("diff {index}"));
        }
        assert_eq!(detector.diffs.len(), MIN_WINDOW);
    }
}
