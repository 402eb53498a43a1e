//! Response pipeline: wraps "generate → guard-check" into a single call with
//! bounded retries.
//!
//! Two shapes: a single-shot check for callers that already hold the text,
//! and a retry-driving check that loops through a caller-supplied inference
//! function with a decaying temperature. Fail-open throughout: a transport
//! error from the inference function becomes a SOFT_FAIL with the canned
//! response, never a propagated exception — this pipeline must not let a
//! downstream failure crash the turn.
//!
//! The kill switch is checked first in every entry point. When disabled the
//! input passes through unchanged, synchronously, with zero side effects.

use crate::bus::EvaluationBus;
use crate::config::GuardConfig;
use crate::facts::FactSnapshot;
use crate::guard::{GuardIssue, GuardResult, OutputGuard, SOFT_FAIL_RESPONSE};
use crate::ledger::ArchitectureIssueLog;
use crate::types::{ArchitectureIssueKind, GuardAction, IssueKind};

use serde::{Deserialize, Serialize};

use std::sync::Arc;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Per-turn inputs for a check: the authoritative facts and, when known,
/// the active persona's name.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub facts: &'a FactSnapshot,
    pub persona_name: Option<&'a str>,
}

/// What a pipeline call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineOutcome {
    /// The text to surface to the user — the validated original, a
    /// regenerated replacement, or the canned fallback.
    pub response: String,
    pub guard: GuardResult,
    /// Whether `response` differs from the text the caller passed in.
    pub was_modified: bool,
    /// Inference round-trips spent by the retry loop (always 0 for the
    /// single-shot shape).
    pub retries_used: u32,
}

// ---------------------------------------------------------------------------
// ResponsePipeline
// ---------------------------------------------------------------------------

/// Owns one conversation's guard and failure-streak tracking.
///
/// The consecutive-failure counter is a cheap anomaly detector for "the
/// model has drifted or is misconfigured" — distinct from any single turn's
/// retry budget. Crossing the threshold logs a REPEATED_FAILURE
/// architecture issue and resets the streak.
pub struct ResponsePipeline {
    config: GuardConfig,
    guard: OutputGuard,
    issues: Arc<ArchitectureIssueLog>,
    consecutive_failures: u32,
}

impl ResponsePipeline {
    pub fn new(
        config: GuardConfig,
        bus: Arc<EvaluationBus>,
        issues: Arc<ArchitectureIssueLog>,
    ) -> Self {
        Self {
            guard: OutputGuard::new(&config, bus),
            config,
            issues,
            consecutive_failures: 0,
        }
    }

    /// Validate text the caller already has. No inference, no suspension.
    pub fn check_response(&mut self, text: &str, context: &CheckContext<'_>) -> PipelineOutcome {
        if !self.config.enabled {
            return passthrough(text);
        }

        let result = self.guard.check(text, context.facts, context.persona_name);
        self.track_outcome(result.action);

        let (response, was_modified) = match result.action {
            GuardAction::SoftFail | GuardAction::HardFail => (
                result
                    .corrected_response
                    .clone()
                    .unwrap_or_else(|| SOFT_FAIL_RESPONSE.to_string()),
                true,
            ),
            _ => (text.to_string(), false),
        };

        PipelineOutcome {
            response,
            was_modified,
            retries_used: 0,
            guard: result,
        }
    }

    /// Validate and, on RETRY, regenerate through `infer` until the text
    /// passes or the budget runs out.
    ///
    /// `infer` receives the decayed sampling temperature and a retry prompt
    /// describing the concrete problems to fix. An `Err` from `infer` is
    /// converted into an immediate SOFT_FAIL.
    pub async fn check_response_with_retry<F, Fut>(
        &mut self,
        initial: &str,
        context: &CheckContext<'_>,
        mut infer: F,
    ) -> PipelineOutcome
    where
        F: FnMut(f64, String) -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        if !self.config.enabled {
            return passthrough(initial);
        }

        let mut current = initial.to_string();
        let mut retries_used = 0u32;

        loop {
            let result = self.guard.check(&current, context.facts, context.persona_name);
            self.track_outcome(result.action);

            match result.action {
                GuardAction::Pass => {
                    let was_modified = current != initial;
                    return PipelineOutcome {
                        response: current,
                        was_modified,
                        retries_used,
                        guard: result,
                    };
                }
                GuardAction::SoftFail | GuardAction::HardFail => {
                    let response = result
                        .corrected_response
                        .clone()
                        .unwrap_or_else(|| SOFT_FAIL_RESPONSE.to_string());
                    return PipelineOutcome {
                        response,
                        was_modified: true,
                        retries_used,
                        guard: result,
                    };
                }
                GuardAction::Retry => {
                    retries_used += 1;
                    let temperature = self.guard.next_temperature();
                    let prompt = retry_prompt(&result.issues);

                    tracing::debug!(
                        retries_used,
                        temperature,
                        issues = result.issues.len(),
                        "guard requested a regeneration"
                    );

                    match infer(temperature, prompt).await {
                        Ok(regenerated) => current = regenerated,
                        Err(error) => {
                            tracing::warn!(
                                %error,
                                "inference call failed during retry; soft-failing the turn"
                            );
                            self.track_outcome(GuardAction::SoftFail);
                            return PipelineOutcome {
                                response: SOFT_FAIL_RESPONSE.to_string(),
                                was_modified: true,
                                retries_used,
                                guard: GuardResult {
                                    action: GuardAction::SoftFail,
                                    issues: result.issues,
                                    corrected_response: Some(SOFT_FAIL_RESPONSE.to_string()),
                                    retry_count: result.retry_count,
                                },
                            };
                        }
                    }
                }
            }
        }
    }

    /// Current non-PASS streak length.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Clear the guard's retry budget and the failure streak, e.g. at a
    /// conversation boundary.
    pub fn reset(&mut self) {
        self.guard.reset();
        self.consecutive_failures = 0;
    }

    fn track_outcome(&mut self, action: GuardAction) {
        if action == GuardAction::Pass {
            self.consecutive_failures = 0;
            return;
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.repeated_failure_threshold {
            self.issues.log(
                ArchitectureIssueKind::RepeatedFailure,
                format!(
                    "{} consecutive guard failures; the generator may have drifted",
                    self.consecutive_failures
                ),
                0.8,
                Some(serde_json::json!({
                    "consecutive_failures": self.consecutive_failures,
                })),
            );
            self.consecutive_failures = 0;
        }
    }
}

impl std::fmt::Debug for ResponsePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponsePipeline")
            .field("enabled", &self.config.enabled)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}

/// Kill-switch result: the input unchanged, no events, no counters.
fn passthrough(text: &str) -> PipelineOutcome {
    PipelineOutcome {
        response: text.to_string(),
        guard: GuardResult::passthrough(),
        was_modified: false,
        retries_used: 0,
    }
}

/// Render the issues from a failed check into regeneration guidance.
fn retry_prompt(issues: &[GuardIssue]) -> String {
    let mut problems = Vec::with_capacity(issues.len());
    for issue in issues {
        let field = issue.field.as_deref().unwrap_or("a fact");
        let expected = issue.expected.as_deref().unwrap_or("unknown");
        let actual = issue.actual.as_deref().unwrap_or("something else");
        problems.push(match issue.kind {
            IssueKind::FactMutation => {
                format!("you misstated {field}: the real value is {expected}, you said {actual}")
            }
            IssueKind::FactApproximation => {
                format!("you left out {field} (currently {expected})")
            }
            IssueKind::IdentityLeak => {
                format!("you broke character with \"{actual}\"")
            }
            IssueKind::PersonaDrift => {
                format!("you slipped into assistant phrasing (\"{actual}\")")
            }
            IssueKind::IdentityContradiction => {
                format!("you called yourself {actual}; your name is {expected}")
            }
        });
    }

    if problems.is_empty() {
        "Regenerate your reply, restating the current facts exactly and staying in character."
            .to_string()
    } else {
        format!(
            "Regenerate your reply with the same intent, but fix these problems: {}.",
            problems.join("; ")
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
