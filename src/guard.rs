//! Output guard: fact-echo and identity/persona validation for generated
//! speech.
//!
//! One `OutputGuard` is owned per conversation (or per test) — the retry
//! counter inside it is turn-sequence state and must never be shared, or one
//! conversation's retries bleed into another's budget. Every check emits a
//! single GUARD-sourced event onto the evaluation bus so the downstream
//! feedback loops (chemistry, trust, budgets) see what happened.

pub mod echo;
pub mod identity;

use crate::bus::{EvaluationBus, EvaluationEvent};
use crate::config::GuardConfig;
use crate::facts::FactSnapshot;
use crate::types::{GuardAction, IssueKind, Source, Stage, Valence};

use serde::{Deserialize, Serialize};

use std::sync::Arc;

/// Fixed fallback returned when the retry budget is exhausted. The original
/// text is discarded entirely — a safe canned line beats automatic surgery
/// on a possibly-still-wrong response.
pub const SOFT_FAIL_RESPONSE: &str =
    "Sorry — I lost my thread for a second there. Give me a moment and ask me again?";

/// Severity recorded on the bus for a clean pass.
const PASS_SEVERITY: f64 = 0.3;

// ---------------------------------------------------------------------------
// Issue and result types
// ---------------------------------------------------------------------------

/// A single content violation found during a check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GuardIssue {
    pub kind: IssueKind,
    /// The fact key involved, for fact-class issues.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    pub severity: f64,
}

/// Outcome of one guard check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GuardResult {
    pub action: GuardAction,
    pub issues: Vec<GuardIssue>,
    /// The canned replacement text, present only on SOFT_FAIL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_response: Option<String>,
    /// The owning guard's cumulative retry counter after this check.
    pub retry_count: u32,
}

impl GuardResult {
    /// A passthrough result used when the kill switch is off.
    pub(crate) fn passthrough() -> Self {
        Self {
            action: GuardAction::Pass,
            issues: Vec::new(),
            corrected_response: None,
            retry_count: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// OutputGuard
// ---------------------------------------------------------------------------

/// Per-conversation output validator with a bounded retry budget.
#[derive(Debug)]
pub struct OutputGuard {
    bus: Arc<EvaluationBus>,
    strict_facts: bool,
    max_retries: u32,
    base_temperature: f64,
    min_temperature: f64,
    retry_count: u32,
}

impl OutputGuard {
    pub fn new(config: &GuardConfig, bus: Arc<EvaluationBus>) -> Self {
        Self {
            bus,
            strict_facts: config.strict_facts,
            max_retries: config.max_retries,
            base_temperature: config.base_temperature,
            min_temperature: config.min_temperature,
            retry_count: 0,
        }
    }

    /// Validate one generated response against the authoritative snapshot.
    ///
    /// Only the user-facing speech surface is inspected; structured
    /// `internal_thought` content is parsed away and never checked. A
    /// fact mutation or identity leak forces RETRY until the budget is
    /// spent, after which the result is SOFT_FAIL with the canned
    /// replacement. A clean PASS resets the retry counter.
    pub fn check(
        &mut self,
        raw_output: &str,
        snapshot: &FactSnapshot,
        persona_name: Option<&str>,
    ) -> GuardResult {
        let output = echo::ModelOutput::parse(raw_output);
        let echo_report = echo::check_fact_echo(snapshot, &output);

        let mut issues = echo_report.issues;
        issues.extend(identity::scan_identity_leaks(&output.speech));
        issues.extend(identity::scan_persona_drift(&output.speech, persona_name));

        let forced = issues.iter().any(|issue| issue.kind.forces_retry());
        // In strict mode a snapshot with facts demands an echo covering the
        // required set; non-strict turns may skip the echo entirely.
        let strict_block = self.strict_facts
            && !snapshot.is_empty()
            && (!echo_report.echo_present || echo_report.missing_required);

        let action = if forced || strict_block {
            self.retry_count += 1;
            if self.retry_count >= self.max_retries {
                GuardAction::SoftFail
            } else {
                GuardAction::Retry
            }
        } else {
            self.retry_count = 0;
            GuardAction::Pass
        };

        let result = GuardResult {
            action,
            corrected_response: (action == GuardAction::SoftFail)
                .then(|| SOFT_FAIL_RESPONSE.to_string()),
            retry_count: self.retry_count,
            issues,
        };

        self.emit(&result);
        result
    }

    /// Sampling temperature for the next inference attempt, decaying with
    /// each retry so regeneration gets progressively more conservative.
    pub fn next_temperature(&self) -> f64 {
        (self.base_temperature - 0.1 * f64::from(self.retry_count)).max(self.min_temperature)
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Clear the retry budget, e.g. at a conversation boundary.
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    /// Record this check on the evaluation bus: one event, tagged with the
    /// action taken plus one tag per issue class found.
    fn emit(&self, result: &GuardResult) {
        let mut tags = vec![result.action.tag()];
        for issue in &result.issues {
            let tag = issue.kind.tag();
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        let worst = result
            .issues
            .iter()
            .map(|issue| issue.severity)
            .fold(0.0_f64, f64::max);

        let (severity, valence) = if result.issues.is_empty() && result.action == GuardAction::Pass
        {
            (PASS_SEVERITY, Valence::Positive)
        } else {
            (worst.max(PASS_SEVERITY), Valence::Negative)
        };

        self.bus.emit(EvaluationEvent::new(
            Source::Guard,
            Stage::Guard,
            severity,
            valence,
            tags,
            1.0,
        ));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
