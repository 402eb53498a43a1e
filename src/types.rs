//! Shared wire-visible types for the guard system.
//!
//! Every enum here serializes exactly as the telemetry consumers expect:
//! sources and stages in SCREAMING_SNAKE_CASE, tags and issue kinds in
//! snake_case. The per-variant constants (`Stage::signal_weight`,
//! `Stage::daily_penalty_cap`) are fixed configuration — their relative
//! ordering is load-bearing for signal aggregation and budget accounting.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Which subsystem produced an evaluation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Goal,
    Confession,
    Parser,
    Guard,
    User,
}

impl Source {
    /// Parse from a string, defaulting to Guard.
    pub fn from_str_lossy(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "GOAL" => Self::Goal,
            "CONFESSION" => Self::Confession,
            "PARSER" => Self::Parser,
            "USER" => Self::User,
            _ => Self::Guard,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Goal => write!(f, "GOAL"),
            Self::Confession => write!(f, "CONFESSION"),
            Self::Parser => write!(f, "PARSER"),
            Self::Guard => write!(f, "GUARD"),
            Self::User => write!(f, "USER"),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// The pipeline layer an evaluation signal originated from.
///
/// The weight ordering encodes a design principle: a user's expressed
/// dissatisfaction is weighted ~7.5x a tool-level hiccup, because tool
/// failures are expected, recoverable noise while user-level signals are
/// ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Tool,
    Router,
    Prism,
    Guard,
    User,
}

impl Stage {
    /// All stages, in weight order.
    pub const ALL: [Stage; 5] = [
        Stage::Tool,
        Stage::Router,
        Stage::Guard,
        Stage::Prism,
        Stage::User,
    ];

    /// Fixed weight applied to signals from this stage during aggregation.
    pub fn signal_weight(&self) -> f64 {
        match self {
            Self::Tool => 0.02,
            Self::Router => 0.03,
            Self::Guard => 0.05,
            Self::Prism => 0.10,
            Self::User => 0.15,
        }
    }

    /// Fixed daily cap on accumulated penalties attributed to this stage.
    pub fn daily_penalty_cap(&self) -> f64 {
        match self {
            Self::Tool => 5.0,
            Self::Router => 8.0,
            Self::Prism => 15.0,
            Self::Guard => 10.0,
            Self::User => 20.0,
        }
    }

    /// Parse from a string, defaulting to Guard.
    pub fn from_str_lossy(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "TOOL" => Self::Tool,
            "ROUTER" => Self::Router,
            "PRISM" => Self::Prism,
            "USER" => Self::User,
            _ => Self::Guard,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tool => write!(f, "TOOL"),
            Self::Router => write!(f, "ROUTER"),
            Self::Prism => write!(f, "PRISM"),
            Self::Guard => write!(f, "GUARD"),
            Self::User => write!(f, "USER"),
        }
    }
}

// ---------------------------------------------------------------------------
// Valence
// ---------------------------------------------------------------------------

/// Direction of an evaluation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Valence {
    Positive,
    Negative,
}

impl Valence {
    /// Sign multiplier used in signal aggregation.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
        }
    }
}

impl std::fmt::Display for Valence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Negative => write!(f, "negative"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

/// Classification tags attached to evaluation events.
///
/// Guard checks tag their event with the action taken plus one tag per issue
/// class found. `Pass` is always emitted explicitly so that "checked and
/// passed" is distinguishable from "never checked" in the stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Pass,
    Retry,
    SoftFail,
    HardFail,
    FactMutation,
    FactApproximation,
    IdentityLeak,
    PersonaDrift,
    IdentityContradiction,
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Retry => write!(f, "retry"),
            Self::SoftFail => write!(f, "soft_fail"),
            Self::HardFail => write!(f, "hard_fail"),
            Self::FactMutation => write!(f, "fact_mutation"),
            Self::FactApproximation => write!(f, "fact_approximation"),
            Self::IdentityLeak => write!(f, "identity_leak"),
            Self::PersonaDrift => write!(f, "persona_drift"),
            Self::IdentityContradiction => write!(f, "identity_contradiction"),
        }
    }
}

// ---------------------------------------------------------------------------
// Guard actions
// ---------------------------------------------------------------------------

/// Outcome of a single guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardAction {
    Pass,
    Retry,
    SoftFail,
    HardFail,
}

impl GuardAction {
    /// The tag recorded on the bus for this action.
    pub fn tag(&self) -> Tag {
        match self {
            Self::Pass => Tag::Pass,
            Self::Retry => Tag::Retry,
            Self::SoftFail => Tag::SoftFail,
            Self::HardFail => Tag::HardFail,
        }
    }
}

impl std::fmt::Display for GuardAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Retry => write!(f, "RETRY"),
            Self::SoftFail => write!(f, "SOFT_FAIL"),
            Self::HardFail => write!(f, "HARD_FAIL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Issue kinds
// ---------------------------------------------------------------------------

/// Class of a single content violation found by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    FactMutation,
    FactApproximation,
    IdentityLeak,
    PersonaDrift,
    IdentityContradiction,
}

impl IssueKind {
    /// Whether this issue class alone forces a RETRY outcome.
    ///
    /// Fact mutation is the single highest-priority failure class; identity
    /// leaks are the second. Drift and approximation issues are recorded but
    /// do not block the response on their own.
    pub fn forces_retry(&self) -> bool {
        matches!(self, Self::FactMutation | Self::IdentityLeak)
    }

    /// The tag recorded on the bus for this issue class.
    pub fn tag(&self) -> Tag {
        match self {
            Self::FactMutation => Tag::FactMutation,
            Self::FactApproximation => Tag::FactApproximation,
            Self::IdentityLeak => Tag::IdentityLeak,
            Self::PersonaDrift => Tag::PersonaDrift,
            Self::IdentityContradiction => Tag::IdentityContradiction,
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FactMutation => write!(f, "fact_mutation"),
            Self::FactApproximation => write!(f, "fact_approximation"),
            Self::IdentityLeak => write!(f, "identity_leak"),
            Self::PersonaDrift => write!(f, "persona_drift"),
            Self::IdentityContradiction => write!(f, "identity_contradiction"),
        }
    }
}

// ---------------------------------------------------------------------------
// Architecture issues
// ---------------------------------------------------------------------------

/// Class of a systemic anomaly worth human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchitectureIssueKind {
    SourceConflict,
    IntegrationError,
    RepeatedFailure,
}

impl std::fmt::Display for ArchitectureIssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceConflict => write!(f, "SOURCE_CONFLICT"),
            Self::IntegrationError => write!(f, "INTEGRATION_ERROR"),
            Self::RepeatedFailure => write!(f, "REPEATED_FAILURE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Clamp a value into `[0.0, 1.0]`.
pub(crate) fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
