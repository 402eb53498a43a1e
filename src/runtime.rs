//! Guard runtime: one owned, disposable bundle of all shared guard state.
//!
//! There are no module-level singletons anywhere in this crate. A process
//! that wants "the global guard" constructs one `GuardRuntime` at startup
//! and passes it (or clones of its `Arc`s) to whoever owns a conversation.
//! Tests construct their own and throw them away.

use crate::bus::EvaluationBus;
use crate::chemistry::ChemistryBridge;
use crate::config::GuardConfig;
use crate::guard::OutputGuard;
use crate::ledger::{ArchitectureIssueLog, PenaltyLedger};
use crate::observatory::Observatory;
use crate::pipeline::ResponsePipeline;

use std::sync::Arc;

/// Owns the evaluation bus, the daily penalty ledger, and the architecture
/// issue log for one agent session.
#[derive(Debug)]
pub struct GuardRuntime {
    config: GuardConfig,
    bus: Arc<EvaluationBus>,
    penalties: Arc<PenaltyLedger>,
    issues: Arc<ArchitectureIssueLog>,
}

impl GuardRuntime {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            bus: Arc::new(EvaluationBus::new()),
            penalties: Arc::new(PenaltyLedger::new()),
            issues: Arc::new(ArchitectureIssueLog::new()),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EvaluationBus> {
        &self.bus
    }

    pub fn penalties(&self) -> &Arc<PenaltyLedger> {
        &self.penalties
    }

    pub fn issues(&self) -> &Arc<ArchitectureIssueLog> {
        &self.issues
    }

    /// A fresh pipeline for one conversation. Each conversation gets its own
    /// so retry budgets and failure streaks never bleed across.
    pub fn pipeline(&self) -> ResponsePipeline {
        ResponsePipeline::new(self.config.clone(), self.bus.clone(), self.issues.clone())
    }

    /// A fresh bare guard, for callers that drive checks directly.
    pub fn guard(&self) -> OutputGuard {
        OutputGuard::new(&self.config, self.bus.clone())
    }

    /// A chemistry bridge over this runtime's bus.
    pub fn chemistry(&self) -> ChemistryBridge {
        ChemistryBridge::new(self.bus.clone(), &self.config)
    }

    /// A telemetry surface over this runtime's shared state.
    pub fn observatory(&self) -> Observatory {
        Observatory::new(self.bus.clone(), self.penalties.clone(), self.issues.clone())
    }

    /// Wipe bus history, metrics, penalties, and logged issues. Used at
    /// session boundaries and in tests.
    pub fn reset(&self) {
        self.bus.clear();
        self.penalties.reset();
        self.issues.clear();
    }
}

impl Default for GuardRuntime {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::FactSnapshot;
    use crate::pipeline::CheckContext;
    use crate::types::{GuardAction, Stage};

    fn snapshot() -> FactSnapshot {
        FactSnapshot::builder()
            .energy(23.0)
            .build_with_time("2026-08-07 12:00")
    }

    fn bad_text() -> String {
        serde_json::json!({
            "speech": "so much energy today!",
            "fact_echo": { "energy": 90, "time": "2026-08-07 12:00" }
        })
        .to_string()
    }

    #[test]
    fn pipelines_share_the_bus_but_not_retry_budgets() {
        let runtime = GuardRuntime::default();
        let context = CheckContext {
            facts: &snapshot(),
            persona_name: None,
        };

        let mut first = runtime.pipeline();
        let mut second = runtime.pipeline();

        for _ in 0..3 {
            first.check_response(&bad_text(), &context);
        }
        // First pipeline's budget is spent; the second is untouched.
        let outcome = second.check_response(&bad_text(), &context);
        assert_eq!(outcome.guard.action, GuardAction::Retry);

        // But every check landed on the shared bus.
        assert_eq!(runtime.bus().metrics().total_events, 4);
    }

    #[test]
    fn end_to_end_telemetry_flows_through_the_runtime() {
        let runtime = GuardRuntime::default();
        let mut pipeline = runtime.pipeline();
        let context = CheckContext {
            facts: &snapshot(),
            persona_name: Some("Nova"),
        };

        pipeline.check_response(&bad_text(), &context);
        runtime.penalties().record(Stage::Guard, 1.0);

        let dashboard = runtime.observatory().dashboard();
        assert!(dashboard.trust.index < 1.0);
        assert_eq!(dashboard.penalties.penalties["GUARD"], 1.0);
        assert!(dashboard.guard.retry_rate > 0.0);

        let delta = runtime.chemistry().delta_from_bus();
        assert!(delta.dopamine < 0.0, "a failed check should read as negative signal");
    }

    #[test]
    fn reset_restores_a_blank_slate() {
        let runtime = GuardRuntime::default();
        let mut pipeline = runtime.pipeline();
        pipeline.check_response(&bad_text(), &CheckContext {
            facts: &snapshot(),
            persona_name: None,
        });
        runtime.penalties().record(Stage::Tool, 3.0);
        runtime.issues().log(
            crate::types::ArchitectureIssueKind::IntegrationError,
            "stale wiring",
            0.5,
            None,
        );

        runtime.reset();

        assert_eq!(runtime.bus().metrics().total_events, 0);
        assert_eq!(runtime.penalties().remaining_budget(Stage::Tool), 5.0);
        assert!(runtime.issues().is_empty());
        assert_eq!(runtime.observatory().dashboard().trust.index, 1.0);
    }

    #[test]
    fn independent_runtimes_are_fully_isolated() {
        let first = GuardRuntime::default();
        let second = GuardRuntime::default();

        let mut pipeline = first.pipeline();
        pipeline.check_response(&bad_text(), &CheckContext {
            facts: &snapshot(),
            persona_name: None,
        });

        assert_eq!(first.bus().metrics().total_events, 1);
        assert_eq!(second.bus().metrics().total_events, 0);
    }
}
