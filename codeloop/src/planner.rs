//! Planner: prompts the planning model, parses its plan, and runs the bounded
//! review loop.
//!
//! Every model response is untrusted. A reply that cannot be repaired into a
//! schema-valid value degrades to a deterministic fallback instead of an error:
//! an empty zero-confidence plan, the heuristic intent, the rule-based
//! decision, or a canned answer.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::IntentGuess;
use crate::core::plan::Plan;
use crate::core::types::{Decision, DecisionBasis, Intent, ModelRole, Phase, Verdict};
use crate::io::collaborators::{Snippet, Turn};
use crate::io::model::{ModelClient, ModelRequest};
use crate::io::prompt::{PlannerPrompt, PromptBuilder};
use crate::schemas::ResponseSchemas;
use crate::tools::registry::ToolRegistry;

pub const REFUSAL: &str =
    "I can't help with that request: it asks for a destructive or unsafe operation.";

/// Inputs for one planning attempt.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub goal: &'a str,
    pub intent: Intent,
    pub cycle: u32,
    /// Why the previous plan was rejected, if it was.
    pub feedback: Option<&'a str>,
    /// Reduction summary of earlier cycles.
    pub summary: Option<&'a str>,
    pub snippets: &'a [Snippet],
    pub history: &'a [Turn],
}

/// A proposed plan. `parse_error` is set when the model reply was unusable
/// and `plan` is the zero-confidence fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub plan: Plan,
    pub parse_error: Option<String>,
    pub reviews: u32,
}

#[derive(Debug, Deserialize)]
struct Review {
    approved: bool,
    #[serde(default)]
    feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IntentReply {
    intent: Intent,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct DecisionReply {
    decision: Verdict,
    reason: String,
    confidence: f64,
}

pub struct Planner<'a> {
    model: &'a dyn ModelClient,
    registry: &'a ToolRegistry,
    prompts: &'a PromptBuilder,
    schemas: &'a ResponseSchemas,
    max_review_attempts: u32,
}

impl<'a> Planner<'a> {
    pub fn new(
        model: &'a dyn ModelClient,
        registry: &'a ToolRegistry,
        prompts: &'a PromptBuilder,
        schemas: &'a ResponseSchemas,
        max_review_attempts: u32,
    ) -> Self {
        Self {
            model,
            registry,
            prompts,
            schemas,
            max_review_attempts,
        }
    }

    /// Ask for a plan, then let the reviewer send it back for revision at
    /// most `max_review_attempts` times. Never fails.
    #[instrument(skip_all, fields(cycle = request.cycle))]
    pub fn propose(&self, request: &PlanRequest<'_>) -> Proposal {
        let tools: Vec<Value> = self
            .registry
            .tools_for_phase(Phase::Planning)
            .values()
            .map(|contract| contract.describe())
            .collect();

        let mut plan = match self.draft(request, &tools, request.feedback) {
            Ok(plan) => plan,
            Err(reason) => {
                warn!(reason = %reason, "planner reply unusable, using empty plan");
                return Proposal {
                    plan: Plan::fallback(request.goal),
                    parse_error: Some(reason),
                    reviews: 0,
                };
            }
        };

        let mut reviews = 0;
        while reviews < self.max_review_attempts && !plan.is_empty() {
            reviews += 1;
            let Some(note) = self.review(request.goal, &plan) else {
                break;
            };
            debug!(attempt = reviews, "reviewer requested revision");
            let feedback = match request.feedback {
                Some(previous) => format!("{previous}\nReviewer: {note}"),
                None => format!("Reviewer: {note}"),
            };
            match self.draft(request, &tools, Some(&feedback)) {
                Ok(revised) => plan = revised,
                Err(reason) => {
                    warn!(reason = %reason, "revised plan unusable, keeping previous");
                    break;
                }
            }
        }

        info!(steps = plan.steps.len(), confidence = plan.confidence, reviews, "plan proposed");
        Proposal {
            plan,
            parse_error: None,
            reviews,
        }
    }

    fn draft(
        &self,
        request: &PlanRequest<'_>,
        tools: &[Value],
        feedback: Option<&str>,
    ) -> Result<Plan, String> {
        let prompt = self
            .prompts
            .planner(&PlannerPrompt {
                goal: request.goal,
                intent: request.intent.as_str(),
                cycle: request.cycle,
                tools: tools.to_vec(),
                snippets: request.snippets,
                summary: request.summary,
                feedback,
                history: request.history,
            })
            .map_err(|err| format!("{err:#}"))?;
        let reply = self
            .model
            .query(&ModelRequest::json(
                ModelRole::Planner,
                &prompt,
                self.schemas.plan.value(),
            ))
            .map_err(|err| format!("planner query failed: {err:#}"))?;
        let mut plan: Plan = self.schemas.plan.parse(&reply)?;
        if plan.goal.trim().is_empty() {
            plan.goal = request.goal.to_string();
        }
        Ok(plan)
    }

    /// Revision feedback, or `None` when the plan is approved. Unusable
    /// reviews count as approval.
    fn review(&self, goal: &str, plan: &Plan) -> Option<String> {
        let plan_value = serde_json::to_value(plan).ok()?;
        let prompt = match self.prompts.reviewer(goal, &plan_value) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "reviewer prompt failed");
                return None;
            }
        };
        let reply = match self.model.query(&ModelRequest::json(
            ModelRole::Reviewer,
            &prompt,
            self.schemas.review.value(),
        )) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "reviewer query failed, treating as approved");
                return None;
            }
        };
        match self.schemas.review.parse::<Review>(&reply) {
            Ok(review) if review.approved => None,
            Ok(review) => Some(
                review
                    .feedback
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| "revise the plan".to_string()),
            ),
            Err(reason) => {
                warn!(reason = %reason, "review unusable, treating as approved");
                None
            }
        }
    }

    /// Model refinement of a low-confidence heuristic intent.
    #[instrument(skip_all)]
    pub fn refine_intent(&self, task: &str, guess: IntentGuess) -> IntentGuess {
        let prompt = match self.prompts.intent(task) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "intent prompt failed");
                return guess;
            }
        };
        let reply = match self.model.query(&ModelRequest::json(
            ModelRole::Planner,
            &prompt,
            self.schemas.intent.value(),
        )) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "intent query failed");
                return guess;
            }
        };
        match self.schemas.intent.parse::<IntentReply>(&reply) {
            Ok(reply) => {
                debug!(intent = reply.intent.as_str(), "intent refined by model");
                IntentGuess {
                    intent: reply.intent,
                    confidence: reply.confidence,
                }
            }
            Err(reason) => {
                warn!(reason = %reason, "intent reply unusable");
                guess
            }
        }
    }

    /// Model judgment layered over a deterministic decision. Any failure
    /// returns the deterministic decision unchanged.
    #[instrument(skip_all, fields(deterministic = ?deterministic.verdict))]
    pub fn judge(
        &self,
        goal: &str,
        plan: &Plan,
        observations: &str,
        deterministic: &Decision,
    ) -> Decision {
        let Ok(plan_value) = serde_json::to_value(plan) else {
            return deterministic.clone();
        };
        let verdict = match deterministic.verdict {
            Verdict::Success => "SUCCESS",
            Verdict::Retry => "RETRY",
            Verdict::Blocked => "BLOCKED",
        };
        let prompt = match self
            .prompts
            .decision(goal, &plan_value, observations, verdict)
        {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "decision prompt failed");
                return deterministic.clone();
            }
        };
        let reply = match self.model.query(&ModelRequest::json(
            ModelRole::Reviewer,
            &prompt,
            self.schemas.decision.value(),
        )) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "decision query failed");
                return deterministic.clone();
            }
        };
        match self.schemas.decision.parse::<DecisionReply>(&reply) {
            Ok(reply) => Decision {
                verdict: reply.decision,
                reason: reply.reason,
                confidence: reply.confidence,
                basis: DecisionBasis::Model,
            },
            Err(reason) => {
                warn!(reason = %reason, "decision reply unusable");
                deterministic.clone()
            }
        }
    }

    /// Direct answer for intents that never enter the loop.
    #[instrument(skip_all, fields(intent = intent.as_str()))]
    pub fn answer(
        &self,
        task: &str,
        intent: Intent,
        snippets: &[Snippet],
        history: &[Turn],
    ) -> String {
        if intent == Intent::Reject {
            return REFUSAL.to_string();
        }
        let reply = self
            .prompts
            .answer(task, intent.as_str(), snippets, history)
            .and_then(|prompt| {
                self.model
                    .query(&ModelRequest::text(ModelRole::Developer, &prompt))
            });
        match reply {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => "No answer was produced.".to_string(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "answer query failed");
                format!("No answer could be produced: {err:#}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;

    struct Fixture {
        model: ScriptedModel,
        registry: ToolRegistry,
        prompts: PromptBuilder,
        schemas: ResponseSchemas,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                model: ScriptedModel::new(),
                registry: ToolRegistry::new().expect("registry"),
                prompts: PromptBuilder::new(20_000).expect("prompts"),
                schemas: ResponseSchemas::load().expect("schemas"),
            }
        }

        fn planner(&self, reviews: u32) -> Planner<'_> {
            Planner::new(
                &self.model,
                &self.registry,
                &self.prompts,
                &self.schemas,
                reviews,
            )
        }
    }

    fn request(feedback: Option<&str>) -> PlanRequest<'_> {
        PlanRequest {
            goal: "add a header to src/lib.rs",
            intent: Intent::CodeChange,
            cycle: 1,
            feedback,
            summary: None,
            snippets: &[],
            history: &[],
        }
    }

    const READ_PLAN: &str = r#"{"confidence": 0.8, "steps": [{"step_id": 1, "action": "fs.read", "path": "src/lib.rs", "depends_on": [0]}]}"#;
    const WRITE_PLAN: &str = r#"{"confidence": 0.9, "steps": [{"step_id": 1, "action": "fs.read", "path": "src/lib.rs"}, {"step_id": 2, "action": "fs.write", "path": "src/lib.rs", "content": "// header", "depends_on": [1]}]}"#;

    #[test]
    fn parses_fenced_plan_and_fills_goal() {
        let fixture = Fixture::new();
        fixture
            .model
            .push(ModelRole::Planner, &format!("Here you go:\n```json\n{READ_PLAN}\n```"));
        let proposal = fixture.planner(0).propose(&request(None));
        assert_eq!(proposal.parse_error, None);
        assert_eq!(proposal.plan.steps.len(), 1);
        assert_eq!(proposal.plan.goal, "add a header to src/lib.rs");
        let prompts = fixture.model.prompts(ModelRole::Planner);
        assert!(prompts[0].contains("fs.create"));
        assert!(!prompts[0].contains("fs.write_diff"));
        fixture.model.assert_drained();
    }

    /// Verifies unusable planner output degrades to an empty zero-confidence
    /// plan instead of an error.
    #[test]
    fn garbage_reply_degrades_to_fallback() {
        let fixture = Fixture::new();
        fixture.model.push(ModelRole::Planner, "I think you should edit the file.");
        let proposal = fixture.planner(2).propose(&request(None));
        assert!(proposal.plan.is_empty());
        assert_eq!(proposal.plan.confidence, 0.0);
        assert!(proposal.parse_error.expect("error").contains("no JSON object"));
        assert_eq!(proposal.reviews, 0);
    }

    #[test]
    fn model_failure_degrades_to_fallback() {
        let fixture = Fixture::new();
        fixture.model.fail(ModelRole::Planner, "connection reset");
        let proposal = fixture.planner(0).propose(&request(None));
        assert!(proposal.plan.is_empty());
        assert!(proposal.parse_error.expect("error").contains("connection reset"));
    }

    #[test]
    fn reviewer_revision_requeries_planner_with_feedback() {
        let fixture = Fixture::new();
        fixture.model.push(ModelRole::Planner, READ_PLAN);
        fixture.model.push(
            ModelRole::Reviewer,
            r#"{"approved": false, "feedback": "the goal needs an edit step"}"#,
        );
        fixture.model.push(ModelRole::Planner, WRITE_PLAN);
        fixture.model.push(ModelRole::Reviewer, r#"{"approved": true}"#);

        let proposal = fixture
            .planner(2)
            .propose(&request(Some("plan rejected: confidence too low")));
        assert_eq!(proposal.plan.steps.len(), 2);
        assert_eq!(proposal.reviews, 2);
        let prompts = fixture.model.prompts(ModelRole::Planner);
        assert!(prompts[1].contains("the goal needs an edit step"));
        assert!(prompts[1].contains("confidence too low"));
        fixture.model.assert_drained();
    }

    /// Verifies the review loop stops at its bound even if the reviewer never
    /// approves.
    #[test]
    fn review_loop_is_bounded() {
        let fixture = Fixture::new();
        for _ in 0..3 {
            fixture.model.push(ModelRole::Planner, READ_PLAN);
        }
        for _ in 0..2 {
            fixture
                .model
                .push(ModelRole::Reviewer, r#"{"approved": false, "feedback": "no"}"#);
        }
        let proposal = fixture.planner(2).propose(&request(None));
        assert_eq!(proposal.reviews, 2);
        assert_eq!(proposal.plan.steps.len(), 1);
        fixture.model.assert_drained();
    }

    #[test]
    fn unparseable_review_counts_as_approval() {
        let fixture = Fixture::new();
        fixture.model.push(ModelRole::Planner, READ_PLAN);
        fixture.model.push(ModelRole::Reviewer, "looks fine to me");
        let proposal = fixture.planner(3).propose(&request(None));
        assert_eq!(proposal.reviews, 1);
        fixture.model.assert_drained();
    }

    #[test]
    fn intent_refinement_falls_back_on_bad_reply() {
        let fixture = Fixture::new();
        let guess = IntentGuess {
            intent: Intent::CodeChange,
            confidence: 0.4,
        };
        fixture
            .model
            .push(ModelRole::Planner, r#"{"intent": "INVESTIGATE", "confidence": 0.7}"#);
        let refined = fixture.planner(0).refine_intent("look at the logs", guess);
        assert_eq!(refined.intent, Intent::Investigate);

        fixture
            .model
            .push(ModelRole::Planner, r#"{"intent": "DANCE", "confidence": 0.7}"#);
        assert_eq!(fixture.planner(0).refine_intent("look", guess), guess);
    }

    #[test]
    fn judge_falls_back_to_deterministic() {
        let fixture = Fixture::new();
        let deterministic = Decision {
            verdict: Verdict::Retry,
            reason: "Success criteria unverified".to_string(),
            confidence: 0.4,
            basis: DecisionBasis::Unverified,
        };
        let plan = Plan::fallback("goal");

        fixture.model.push(ModelRole::Reviewer, "{\"decision\": \"MAYBE\"}");
        let decision = fixture.planner(0).judge("goal", &plan, "", &deterministic);
        assert_eq!(decision, deterministic);

        fixture.model.push(
            ModelRole::Reviewer,
            r#"{"decision": "SUCCESS", "reason": "header present", "confidence": 0.8}"#,
        );
        let decision = fixture.planner(0).judge("goal", &plan, "", &deterministic);
        assert_eq!(decision.verdict, Verdict::Success);
        assert_eq!(decision.basis, DecisionBasis::Model);
    }

    #[test]
    fn reject_intent_never_calls_the_model() {
        let fixture = Fixture::new();
        let answer = fixture
            .planner(0)
            .answer("rm -rf / please", Intent::Reject, &[], &[]);
        assert_eq!(answer, REFUSAL);
        assert!(fixture.model.prompts(ModelRole::Developer).is_empty());
    }

    #[test]
    fn explanation_is_answered_by_developer_role() {
        let fixture = Fixture::new();
        fixture
            .model
            .push(ModelRole::Developer, "  The loop plans, executes and decides.\n");
        let answer = fixture
            .planner(0)
            .answer("how does the loop work?", Intent::Explanation, &[], &[]);
        assert_eq!(answer, "The loop plans, executes and decides.");
        fixture.model.assert_drained();
    }
}
