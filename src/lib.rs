//! speechguard: output validation and feedback control for persona agents.
//!
//! Sits between an LLM generator and the user-facing surface of a
//! conversational agent. Verifies that generated speech neither contradicts
//! authoritative system facts (via a mechanical fact-echo comparison) nor
//! leaks the model's underlying identity; converts every validation outcome
//! into a typed signal on the [`bus::EvaluationBus`]; aggregates those
//! signals into a trust index and bounded neurochemistry deltas; and bounds
//! per-stage penalties per day so feedback can never run away.
//!
//! The crate decides nothing about *what* the agent says — it only validates
//! and scores what was already generated. Content violations are data, not
//! errors: nothing in the validation path returns `Err` under normal
//! operation, and the worst-case user-visible output is always the fixed
//! canned fallback in [`guard::SOFT_FAIL_RESPONSE`].
//!
//! Construct a [`GuardRuntime`] per agent session; take one
//! [`pipeline::ResponsePipeline`] per conversation from it.

pub mod bus;
pub mod chemistry;
pub mod config;
pub mod facts;
pub mod guard;
pub mod ledger;
pub mod observatory;
pub mod pipeline;
pub mod runtime;
pub mod trust;
pub mod types;

pub use bus::{AggregatedSignal, BusMetrics, EvaluationBus, EvaluationEvent, GuardStats};
pub use chemistry::{apply_delta, ChemistryBridge, ChemistryDelta, ChemistryState, DeltaSource};
pub use config::{ChemistryConfig, GuardConfig};
pub use facts::{FactSnapshot, FactValue};
pub use guard::{GuardIssue, GuardResult, OutputGuard, SOFT_FAIL_RESPONSE};
pub use ledger::{ArchitectureIssue, ArchitectureIssueLog, PenaltyLedger};
pub use observatory::{DashboardSnapshot, Observatory};
pub use pipeline::{CheckContext, PipelineOutcome, ResponsePipeline};
pub use runtime::GuardRuntime;
pub use trust::{calculate_trust_index, TrustIndexResult};
pub use types::{ArchitectureIssueKind, GuardAction, IssueKind, Source, Stage, Tag, Valence};

use thiserror::Error;

/// Guard system errors.
///
/// Deliberately small: the validation path never fails, and budget
/// exhaustion is a boolean signal rather than an error. The only structural
/// failure is contending for the exclusive chemistry push subscription.
#[derive(Debug, Error)]
pub enum SpeechguardError {
    #[error("a chemistry push subscription is already active")]
    SubscriptionActive,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
