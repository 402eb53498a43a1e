//! Observatory: read-only telemetry surface for the guard system.
//!
//! Produces a single dashboard snapshot (trust index, guard stats, bus
//! metrics, daily penalties, recent architecture issues) for UI consumers,
//! and runs the stage-dominance sweep — an advisory detector for one stage
//! drowning out every other negative signal.

use crate::bus::{BusMetrics, EvaluationBus, GuardStats};
use crate::ledger::{ArchitectureIssue, ArchitectureIssueLog, DailyPenaltySnapshot, PenaltyLedger};
use crate::trust::{calculate_trust_index, TrustIndexResult};
use crate::types::{ArchitectureIssueKind, Stage};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::{Arc, Mutex};

/// How many architecture issues the dashboard carries.
const DASHBOARD_RECENT_ISSUES: usize = 10;

/// Minimum negative events before the dominance sweep has enough evidence.
const DOMINANCE_MIN_NEGATIVE: u64 = 20;

/// Share of all negative events one stage must hold to be dominant.
const DOMINANCE_SHARE: f64 = 0.6;

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

/// Everything a telemetry consumer needs in one read-only snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub trust: TrustIndexResult,
    pub guard: GuardStats,
    pub metrics: BusMetrics,
    pub penalties: DailyPenaltySnapshot,
    pub recent_issues: Vec<ArchitectureIssue>,
}

/// Read-only reporting surface over the runtime's shared state.
pub struct Observatory {
    bus: Arc<EvaluationBus>,
    penalties: Arc<PenaltyLedger>,
    issues: Arc<ArchitectureIssueLog>,
    /// Last dominance report, to avoid re-logging the same streak on every
    /// sweep. A new report is only logged when the dominant stage changes or
    /// its negative count has grown.
    last_dominance: Mutex<Option<(Stage, u64)>>,
}

impl Observatory {
    pub fn new(
        bus: Arc<EvaluationBus>,
        penalties: Arc<PenaltyLedger>,
        issues: Arc<ArchitectureIssueLog>,
    ) -> Self {
        Self {
            bus,
            penalties,
            issues,
            last_dominance: Mutex::new(None),
        }
    }

    /// Build the dashboard snapshot. Side-effect-free.
    pub fn dashboard(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            generated_at: Utc::now(),
            trust: calculate_trust_index(&self.bus),
            guard: self.bus.guard_stats(),
            metrics: self.bus.metrics(),
            penalties: self.penalties.snapshot(),
            recent_issues: self.issues.recent(DASHBOARD_RECENT_ISSUES),
        }
    }

    /// Check whether one stage dominates the negative signal and, if so,
    /// log a SOURCE_CONFLICT architecture issue.
    ///
    /// Advisory only; intended to run on the caller's telemetry cadence.
    /// Returns the dominant stage when a new report was logged.
    pub fn sweep_stage_dominance(&self) -> Option<Stage> {
        let counts = self.bus.negative_stage_counts();
        let total: u64 = counts.values().sum();
        if total < DOMINANCE_MIN_NEGATIVE {
            return None;
        }

        let (&stage, &count) = counts.iter().max_by_key(|(_, count)| **count)?;
        let share = count as f64 / total as f64;
        if share < DOMINANCE_SHARE {
            return None;
        }

        let mut last = self.last_dominance.lock().expect("dominance lock");
        if let Some((previous_stage, previous_count)) = *last
            && previous_stage == stage
            && previous_count == count
        {
            return None;
        }
        *last = Some((stage, count));
        drop(last);

        self.issues.log(
            ArchitectureIssueKind::SourceConflict,
            format!(
                "stage {stage} accounts for {:.0}% of {total} negative events",
                share * 100.0
            ),
            share,
            Some(serde_json::json!({
                "stage": stage.to_string(),
                "negative_events": count,
                "total_negative_events": total,
            })),
        );

        Some(stage)
    }
}

impl std::fmt::Debug for Observatory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observatory").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
