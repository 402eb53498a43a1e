//! Budget accounting: the daily penalty ledger and the architecture issue
//! ring buffer.
//!
//! The ledger bounds how much any one stage may be penalized per calendar
//! day, preventing feedback runaway. Rollover is lazy — every read or write
//! first compares the stored date against today and resets all counters on
//! mismatch. There is no timer.
//!
//! Architecture issues are advisory, human-reviewable records of systemic
//! anomalies. They never block execution.

use crate::types::{ArchitectureIssueKind, Stage};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

/// Maximum retained architecture issues; the oldest is evicted past this.
const ISSUE_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// Penalty ledger
// ---------------------------------------------------------------------------

/// Serializable snapshot of the ledger for telemetry consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DailyPenaltySnapshot {
    /// ISO date the counters belong to.
    pub date: String,
    /// Accumulated penalty per stage today.
    pub penalties: BTreeMap<String, f64>,
    /// Budget left per stage today.
    pub remaining: BTreeMap<String, f64>,
}

#[derive(Debug)]
struct LedgerState {
    date: NaiveDate,
    totals: BTreeMap<Stage, f64>,
}

/// Per-stage daily penalty accounting with lazy calendar rollover.
///
/// Caps are fixed configuration, exposed as [`Stage::daily_penalty_cap`].
/// `can_apply` returning `false` is a pure boolean signal, not an error —
/// callers decide what to do with a refused penalty.
#[derive(Debug)]
pub struct PenaltyLedger {
    inner: Mutex<LedgerState>,
}

impl PenaltyLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerState {
                date: Utc::now().date_naive(),
                totals: BTreeMap::new(),
            }),
        }
    }

    /// Whether `amount` fits under the stage's remaining budget today.
    pub fn can_apply(&self, stage: Stage, amount: f64) -> bool {
        self.with_rolled_state(|state| {
            let spent = state.totals.get(&stage).copied().unwrap_or(0.0);
            spent + amount <= stage.daily_penalty_cap()
        })
    }

    /// Record a penalty against the stage. The ledger does not refuse
    /// over-budget writes — gate with [`Self::can_apply`] first.
    pub fn record(&self, stage: Stage, amount: f64) {
        self.with_rolled_state(|state| {
            *state.totals.entry(stage).or_insert(0.0) += amount;
        });
    }

    /// Budget left for the stage today, never negative.
    pub fn remaining_budget(&self, stage: Stage) -> f64 {
        self.with_rolled_state(|state| {
            let spent = state.totals.get(&stage).copied().unwrap_or(0.0);
            (stage.daily_penalty_cap() - spent).max(0.0)
        })
    }

    /// Snapshot covering every stage, including untouched ones.
    pub fn snapshot(&self) -> DailyPenaltySnapshot {
        self.with_rolled_state(|state| {
            let mut penalties = BTreeMap::new();
            let mut remaining = BTreeMap::new();
            for stage in Stage::ALL {
                let spent = state.totals.get(&stage).copied().unwrap_or(0.0);
                penalties.insert(stage.to_string(), spent);
                remaining.insert(
                    stage.to_string(),
                    (stage.daily_penalty_cap() - spent).max(0.0),
                );
            }
            DailyPenaltySnapshot {
                date: state.date.format("%Y-%m-%d").to_string(),
                penalties,
                remaining,
            }
        })
    }

    /// Zero all counters without waiting for rollover.
    pub fn reset(&self) {
        let mut state = self.inner.lock().expect("penalty ledger lock");
        state.totals.clear();
        state.date = Utc::now().date_naive();
    }

    /// Run an operation against state that has been rolled over to today.
    fn with_rolled_state<R>(&self, operation: impl FnOnce(&mut LedgerState) -> R) -> R {
        let mut state = self.inner.lock().expect("penalty ledger lock");
        let today = Utc::now().date_naive();
        if state.date != today {
            tracing::info!(
                previous = %state.date,
                today = %today,
                "daily penalty ledger rolled over"
            );
            state.totals.clear();
            state.date = today;
        }
        operation(&mut state)
    }

    #[cfg(test)]
    fn force_date(&self, date: NaiveDate) {
        self.inner.lock().unwrap().date = date;
    }
}

impl Default for PenaltyLedger {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Architecture issues
// ---------------------------------------------------------------------------

/// One advisory record of a systemic anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ArchitectureIssue {
    pub timestamp: DateTime<Utc>,
    pub kind: ArchitectureIssueKind,
    pub description: String,
    pub severity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Capped FIFO log of architecture issues.
#[derive(Debug)]
pub struct ArchitectureIssueLog {
    issues: Mutex<VecDeque<ArchitectureIssue>>,
}

impl ArchitectureIssueLog {
    pub fn new() -> Self {
        Self {
            issues: Mutex::new(VecDeque::with_capacity(ISSUE_CAPACITY)),
        }
    }

    /// Append an issue, evicting the oldest past capacity.
    pub fn log(
        &self,
        kind: ArchitectureIssueKind,
        description: impl Into<String>,
        severity: f64,
        context: Option<serde_json::Value>,
    ) {
        let description = description.into();
        tracing::warn!(%kind, severity, "{description}");

        let mut issues = self.issues.lock().expect("issue log lock");
        if issues.len() >= ISSUE_CAPACITY {
            issues.pop_front();
        }
        issues.push_back(ArchitectureIssue {
            timestamp: Utc::now(),
            kind,
            description,
            severity: crate::types::clamp01(severity),
            context,
        });
    }

    /// The most recent `limit` issues, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ArchitectureIssue> {
        let issues = self.issues.lock().expect("issue log lock");
        let skip = issues.len().saturating_sub(limit);
        issues.iter().skip(skip).cloned().collect()
    }

    /// Every retained issue, oldest first.
    pub fn all(&self) -> Vec<ArchitectureIssue> {
        self.issues.lock().expect("issue log lock").iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.issues.lock().expect("issue log lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.issues.lock().expect("issue log lock").clear();
    }
}

impl Default for ArchitectureIssueLog {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
