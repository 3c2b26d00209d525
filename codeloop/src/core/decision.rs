//! Deterministic verdicts from plan, step results, and observations.
//!
//! Rules, first match wins: a failing test means RETRY; a plan with no
//! success criteria is a SUCCESS; a passing test is a SUCCESS; anything else is
//! an unverified RETRY at reduced confidence.

use std::collections::BTreeMap;

use crate::core::plan::Plan;
use crate::core::state::StepResult;
use crate::core::types::{Decision, DecisionBasis, Observation, TestStatus, Verdict};

pub fn decide(
    plan: &Plan,
    step_results: &BTreeMap<u32, StepResult>,
    observations: &[Observation],
) -> Decision {
    if observations.iter().any(|obs| obs.is_test(TestStatus::Fail)) {
        return Decision {
            verdict: Verdict::Retry,
            reason: "Tests failed".to_string(),
            confidence: 0.9,
            basis: DecisionBasis::TestFailed,
        };
    }
    if plan.success_criteria.is_empty() {
        return Decision {
            verdict: Verdict::Success,
            reason: "Plan declared no success criteria".to_string(),
            confidence: 0.7,
            basis: DecisionBasis::NoCriteria,
        };
    }
    if observations.iter().any(|obs| obs.is_test(TestStatus::Pass)) {
        return Decision {
            verdict: Verdict::Success,
            reason: "Tests passed".to_string(),
            confidence: 0.95,
            basis: DecisionBasis::TestPassed,
        };
    }
    let failed = step_results.values().filter(|result| !result.success).count();
    let reason = if failed > 0 {
        format!("Success criteria unverified; {failed} step(s) failed")
    } else {
        "Success criteria unverified".to_string()
    };
    Decision {
        verdict: Verdict::Retry,
        reason,
        confidence: 0.4,
        basis: DecisionBasis::Unverified,
    }
}

/// Whether a model-produced decision may replace a deterministic one.
///
/// Test evidence is final: a model can only weigh in where the rules could not
/// verify anything.
pub fn model_may_override(deterministic: &Decision) -> bool {
    matches!(
        deterministic.basis,
        DecisionBasis::Unverified | DecisionBasis::NoCriteria
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{plan, read_step};

    fn test_result(status: TestStatus) -> Observation {
        Observation::TestResult {
            status,
            command: Some("cargo test".to_string()),
        }
    }

    fn with_criteria() -> Plan {
        let mut plan = plan(vec![read_step(1, "a.rs")]);
        plan.success_criteria = vec!["tests pass".to_string()];
        plan
    }

    #[test]
    fn failing_tests_retry_even_without_criteria() {
        let plan = plan(vec![read_step(1, "a.rs")]);
        let decision = decide(&plan, &BTreeMap::new(), &[test_result(TestStatus::Fail)]);
        assert_eq!(decision.verdict, Verdict::Retry);
        assert_eq!(decision.basis, DecisionBasis::TestFailed);
    }

    #[test]
    fn no_criteria_is_success() {
        let plan = plan(vec![read_step(1, "a.rs")]);
        let decision = decide(&plan, &BTreeMap::new(), &[]);
        assert_eq!(decision.verdict, Verdict::Success);
        assert_eq!(decision.basis, DecisionBasis::NoCriteria);
    }

    #[test]
    fn passing_tests_are_success() {
        let decision = decide(&with_criteria(), &BTreeMap::new(), &[test_result(TestStatus::Pass)]);
        assert_eq!(decision.verdict, Verdict::Success);
    }

    #[test]
    fn fail_then_pass_across_cycles() {
        let plan = with_criteria();
        let first = decide(&plan, &BTreeMap::new(), &[test_result(TestStatus::Fail)]);
        let second = decide(&plan, &BTreeMap::new(), &[test_result(TestStatus::Pass)]);
        assert_eq!(first.verdict, Verdict::Retry);
        assert_eq!(second.verdict, Verdict::Success);
    }

    #[test]
    fn unverified_retry_has_reduced_confidence() {
        let decision = decide(&with_criteria(), &BTreeMap::new(), &[Observation::NoChanges]);
        assert_eq!(decision.verdict, Verdict::Retry);
        assert_eq!(decision.basis, DecisionBasis::Unverified);
        assert!(decision.confidence < 0.5);
        assert!(model_may_override(&decision));
    }

    #[test]
    fn test_evidence_cannot_be_overridden() {
        let decision = decide(&with_criteria(), &BTreeMap::new(), &[test_result(TestStatus::Pass)]);
        assert!(!model_may_override(&decision));
    }
}
