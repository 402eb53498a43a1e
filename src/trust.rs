//! Trust index: a single 0..1 KPI summarizing recent fact-fidelity and
//! persona-fidelity across the whole system.
//!
//! Derived on demand from the bus's running totals; no history is stored
//! beyond what the bus already retains. With zero events the index is
//! defined as 1.0 — absence of evidence is not evidence of failure.

use crate::bus::EvaluationBus;
use crate::types::clamp01;

use serde::{Deserialize, Serialize};

/// Penalty weight per violation class. Mutations are the heaviest because
/// they are the one failure the guard exists to prevent.
const MUTATION_WEIGHT: f64 = 1.0;
const SOFT_FAIL_WEIGHT: f64 = 0.5;
const RETRY_WEIGHT: f64 = 0.3;
const IDENTITY_LEAK_WEIGHT: f64 = 0.8;

/// The trust index and the rates it was computed from. All rates are
/// normalized by total event count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrustIndexResult {
    pub index: f64,
    pub fact_mutation_rate: f64,
    pub soft_fail_rate: f64,
    pub retry_rate: f64,
    pub identity_leak_rate: f64,
    pub total_events: u64,
}

/// Compute the trust index from the bus's running totals.
pub fn calculate_trust_index(bus: &EvaluationBus) -> TrustIndexResult {
    let metrics = bus.metrics();

    if metrics.total_events == 0 {
        return TrustIndexResult {
            index: 1.0,
            fact_mutation_rate: 0.0,
            soft_fail_rate: 0.0,
            retry_rate: 0.0,
            identity_leak_rate: 0.0,
            total_events: 0,
        };
    }

    let total = metrics.total_events as f64;
    let rate = |tag: &str| metrics.by_tag.get(tag).copied().unwrap_or(0) as f64 / total;

    let fact_mutation_rate = rate("fact_mutation");
    let soft_fail_rate = rate("soft_fail");
    let retry_rate = rate("retry");
    let identity_leak_rate = rate("identity_leak");

    let penalty = fact_mutation_rate * MUTATION_WEIGHT
        + soft_fail_rate * SOFT_FAIL_WEIGHT
        + retry_rate * RETRY_WEIGHT
        + identity_leak_rate * IDENTITY_LEAK_WEIGHT;

    TrustIndexResult {
        index: clamp01(1.0 - penalty),
        fact_mutation_rate,
        soft_fail_rate,
        retry_rate,
        identity_leak_rate,
        total_events: metrics.total_events,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EvaluationEvent;
    use crate::types::{Source, Stage, Tag, Valence};

    fn guard_event(tags: Vec<Tag>, valence: Valence) -> EvaluationEvent {
        EvaluationEvent::new(Source::Guard, Stage::Guard, 1.0, valence, tags, 1.0)
    }

    #[test]
    fn empty_bus_yields_full_trust() {
        let bus = EvaluationBus::new();
        let result = calculate_trust_index(&bus);
        assert_eq!(result.index, 1.0);
        assert_eq!(result.total_events, 0);
    }

    #[test]
    fn clean_passes_keep_full_trust() {
        let bus = EvaluationBus::new();
        for _ in 0..5 {
            bus.emit(guard_event(vec![Tag::Pass], Valence::Positive));
        }
        assert_eq!(calculate_trust_index(&bus).index, 1.0);
    }

    #[test]
    fn a_single_mutation_lowers_trust_below_one() {
        let bus = EvaluationBus::new();
        bus.emit(guard_event(vec![Tag::Pass], Valence::Positive));
        bus.emit(guard_event(vec![Tag::Retry, Tag::FactMutation], Valence::Negative));

        let result = calculate_trust_index(&bus);
        assert!(result.index < 1.0);
        assert!((result.fact_mutation_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn a_single_identity_leak_lowers_trust_below_one() {
        let bus = EvaluationBus::new();
        bus.emit(guard_event(vec![Tag::Pass], Valence::Positive));
        bus.emit(guard_event(vec![Tag::Retry, Tag::IdentityLeak], Valence::Negative));

        assert!(calculate_trust_index(&bus).index < 1.0);
    }

    #[test]
    fn penalty_weights_match_the_formula() {
        let bus = EvaluationBus::new();
        // 4 events: one of each violation class, plus a pass.
        bus.emit(guard_event(vec![Tag::Retry, Tag::FactMutation], Valence::Negative));
        bus.emit(guard_event(vec![Tag::SoftFail], Valence::Negative));
        bus.emit(guard_event(vec![Tag::Retry, Tag::IdentityLeak], Valence::Negative));
        bus.emit(guard_event(vec![Tag::Pass], Valence::Positive));

        let result = calculate_trust_index(&bus);
        // mutation 1/4, soft_fail 1/4, retry 2/4, leak 1/4.
        let expected_penalty = 0.25 * 1.0 + 0.25 * 0.5 + 0.5 * 0.3 + 0.25 * 0.8;
        assert!((result.index - (1.0 - expected_penalty)).abs() < 1e-9);
    }

    #[test]
    fn index_never_leaves_the_unit_interval() {
        let bus = EvaluationBus::new();
        for _ in 0..20 {
            bus.emit(guard_event(
                vec![Tag::Retry, Tag::FactMutation, Tag::IdentityLeak],
                Valence::Negative,
            ));
        }

        let result = calculate_trust_index(&bus);
        assert!(result.index >= 0.0);
        assert!(result.index <= 1.0);
        assert_eq!(result.index, 0.0, "maximal sustained violations floor at zero");
    }

    #[test]
    fn non_guard_events_dilute_the_rates() {
        let bus = EvaluationBus::new();
        bus.emit(guard_event(vec![Tag::Retry, Tag::FactMutation], Valence::Negative));
        for _ in 0..9 {
            bus.emit(EvaluationEvent::new(
                Source::User,
                Stage::User,
                0.2,
                Valence::Positive,
                vec![],
                1.0,
            ));
        }

        let result = calculate_trust_index(&bus);
        assert!((result.fact_mutation_rate - 0.1).abs() < 1e-9);
        assert_eq!(result.total_events, 10);
    }
}
