//! Process-wide evaluation bus: append-only event log, synchronous pub/sub,
//! and running-average metrics.
//!
//! Producers emit immutable [`EvaluationEvent`]s; the bus keeps a bounded
//! FIFO history (500 events), maintains O(1) running totals via incremental
//! means, and fans each event out to subscribers on the emitting thread.
//! Volumes are tens of events per conversational turn, so there is no
//! queueing and no backpressure — a slow handler simply blocks the emit.
//!
//! The bus has no knowledge of what produced an event. Isolation between
//! agent sessions is achieved by owning one bus per session rather than
//! sharing a global.

use crate::types::{clamp01, Source, Stage, Tag, Valence};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Bounded history capacity; the oldest event is evicted past this.
const HISTORY_CAPACITY: usize = 500;

/// Fixed scale applied to the averaged signed signal to produce a dopamine
/// delta in chemistry units. Shared with the chemistry bridge's per-event
/// path so both modes agree on units.
pub(crate) const SIGNAL_SCALE: f64 = 50.0;

// ---------------------------------------------------------------------------
// EvaluationEvent
// ---------------------------------------------------------------------------

/// A single immutable evaluation signal.
///
/// Created once via [`EvaluationEvent::new`], which clamps `severity` and
/// `confidence` into `[0, 1]`; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EvaluationEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    pub stage: Stage,
    pub severity: f64,
    pub valence: Valence,
    pub tags: Vec<Tag>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl EvaluationEvent {
    /// Create an event, clamping `severity` and `confidence` into `[0, 1]`.
    pub fn new(
        source: Source,
        stage: Stage,
        severity: f64,
        valence: Valence,
        tags: Vec<Tag>,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source,
            stage,
            severity: clamp01(severity),
            valence,
            tags,
            confidence: clamp01(confidence),
            attribution: None,
            context: None,
        }
    }

    /// Attach a free-form attribution label (e.g. a conversation id).
    pub fn with_attribution(mut self, attribution: impl Into<String>) -> Self {
        self.attribution = Some(attribution.into());
        self
    }

    /// Attach a structured context payload.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// The signed contribution of this event to the aggregated signal.
    fn signed_value(&self) -> f64 {
        self.valence.sign() * self.severity * self.confidence * self.stage.signal_weight()
    }

    #[cfg(test)]
    pub(crate) fn backdated(mut self, age: Duration) -> Self {
        self.timestamp = Utc::now() - age;
        self
    }
}

// ---------------------------------------------------------------------------
// Derived read models
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of the bus's running totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BusMetrics {
    pub total_events: u64,
    pub positive_events: u64,
    pub negative_events: u64,
    /// Incremental mean of severity across all events since the last reset.
    pub avg_severity: f64,
    /// Incremental mean of confidence across all events since the last reset.
    pub avg_confidence: f64,
    pub by_source: BTreeMap<String, u64>,
    pub by_stage: BTreeMap<String, u64>,
    pub by_tag: BTreeMap<String, u64>,
    /// Negative-valence counts per stage; feeds the dominance sweep.
    pub negative_by_stage: BTreeMap<String, u64>,
}

/// Windowed aggregation of recent events into one chemistry-ready signal.
///
/// `confidence == 0.0` means "no signal" — an empty window — and callers
/// must not read it as a confident signal of zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AggregatedSignal {
    pub dopamine_delta: f64,
    pub confidence: f64,
    pub event_count: usize,
}

/// Guard-outcome rates derived from the running totals.
///
/// Two deliberately different denominators: pass/retry/soft-fail rates are
/// normalized by their own sum (how checks resolve), while mutation and
/// drift rates are normalized by *total* events so they stay comparable
/// against non-guard signal volume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GuardStats {
    pub pass_rate: f64,
    pub retry_rate: f64,
    pub soft_fail_rate: f64,
    pub fact_mutation_rate: f64,
    pub persona_drift_rate: f64,
    pub total_events: u64,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RunningTotals {
    total: u64,
    positive: u64,
    negative: u64,
    severity_mean: f64,
    confidence_mean: f64,
    by_source: BTreeMap<Source, u64>,
    by_stage: BTreeMap<Stage, u64>,
    by_tag: BTreeMap<Tag, u64>,
    negative_by_stage: BTreeMap<Stage, u64>,
}

impl RunningTotals {
    fn absorb(&mut self, event: &EvaluationEvent) {
        self.total += 1;
        match event.valence {
            Valence::Positive => self.positive += 1,
            Valence::Negative => {
                self.negative += 1;
                *self.negative_by_stage.entry(event.stage).or_default() += 1;
            }
        }

        // Incremental mean keeps absorption O(1) per event.
        let n = self.total as f64;
        self.severity_mean += (event.severity - self.severity_mean) / n;
        self.confidence_mean += (event.confidence - self.confidence_mean) / n;

        *self.by_source.entry(event.source).or_default() += 1;
        *self.by_stage.entry(event.stage).or_default() += 1;
        for tag in &event.tags {
            *self.by_tag.entry(*tag).or_default() += 1;
        }
    }

    fn tag_count(&self, tag: Tag) -> u64 {
        self.by_tag.get(&tag).copied().unwrap_or(0)
    }
}

struct BusState {
    history: VecDeque<EvaluationEvent>,
    totals: RunningTotals,
}

type Subscriber = Arc<dyn Fn(&EvaluationEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// EvaluationBus
// ---------------------------------------------------------------------------

/// Handle returned by [`EvaluationBus::subscribe`]; pass it back to
/// [`EvaluationBus::unsubscribe`] to detach the handler.
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

/// The evaluation bus. Cheap to share behind an [`Arc`]; all operations are
/// synchronous and internally locked.
pub struct EvaluationBus {
    state: Mutex<BusState>,
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    next_subscriber_id: AtomicU64,
}

impl EvaluationBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState {
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
                totals: RunningTotals::default(),
            }),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(0),
        }
    }

    /// Append an event to the history, update the running totals, and fan
    /// it out to subscribers.
    ///
    /// Fan-out is synchronous on the emitting thread. Each handler runs
    /// isolated: a panicking handler is logged and skipped, and delivery to
    /// the remaining handlers proceeds. Handlers may emit back into the same
    /// bus (the state lock is released before fan-out).
    pub fn emit(&self, event: EvaluationEvent) {
        {
            let mut state = self.state.lock().expect("bus state lock");
            if state.history.len() >= HISTORY_CAPACITY {
                state.history.pop_front();
            }
            state.totals.absorb(&event);
            state.history.push_back(event.clone());
        }

        let handlers: Vec<Subscriber> = {
            let subscribers = self.subscribers.lock().expect("bus subscriber lock");
            subscribers.iter().map(|(_, handler)| handler.clone()).collect()
        };

        for handler in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if outcome.is_err() {
                tracing::warn!(event_id = %event.id, "evaluation subscriber panicked; skipping");
            }
        }
    }

    /// Register a synchronous handler. Returns a handle for unsubscribing.
    pub fn subscribe(
        &self,
        handler: impl Fn(&EvaluationEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("bus subscriber lock")
            .push((id, Arc::new(handler)));
        SubscriptionHandle(id)
    }

    /// Detach a previously registered handler. Unknown handles are ignored.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscribers
            .lock()
            .expect("bus subscriber lock")
            .retain(|(id, _)| *id != handle.0);
    }

    /// Events whose timestamp falls inside the trailing window.
    pub fn recent_events(&self, window: Duration) -> Vec<EvaluationEvent> {
        let cutoff = Utc::now() - window;
        let state = self.state.lock().expect("bus state lock");
        state
            .history
            .iter()
            .filter(|event| event.timestamp > cutoff)
            .cloned()
            .collect()
    }

    /// Collapse the trailing window into one signed signal.
    ///
    /// Each event contributes `sign(valence) x severity x confidence x
    /// stage_weight`; the mean of those contributions is scaled by a fixed
    /// constant to produce `dopamine_delta`. An empty window yields
    /// `{0, 0}` — callers must treat zero confidence as "no signal".
    pub fn aggregated_signal(&self, window: Duration) -> AggregatedSignal {
        let events = self.recent_events(window);
        if events.is_empty() {
            return AggregatedSignal {
                dopamine_delta: 0.0,
                confidence: 0.0,
                event_count: 0,
            };
        }

        let count = events.len() as f64;
        let signed_mean: f64 =
            events.iter().map(EvaluationEvent::signed_value).sum::<f64>() / count;
        let confidence_mean: f64 =
            events.iter().map(|event| event.confidence).sum::<f64>() / count;

        AggregatedSignal {
            dopamine_delta: signed_mean * SIGNAL_SCALE,
            confidence: confidence_mean,
            event_count: events.len(),
        }
    }

    /// Guard outcome rates. See [`GuardStats`] for the two normalizations.
    pub fn guard_stats(&self) -> GuardStats {
        let state = self.state.lock().expect("bus state lock");
        let totals = &state.totals;

        let passes = totals.tag_count(Tag::Pass);
        let retries = totals.tag_count(Tag::Retry);
        let soft_fails = totals.tag_count(Tag::SoftFail);
        let outcomes = passes + retries + soft_fails;

        let outcome_rate = |count: u64| {
            if outcomes == 0 {
                0.0
            } else {
                count as f64 / outcomes as f64
            }
        };
        let total_rate = |count: u64| {
            if totals.total == 0 {
                0.0
            } else {
                count as f64 / totals.total as f64
            }
        };

        let drift =
            totals.tag_count(Tag::PersonaDrift) + totals.tag_count(Tag::IdentityContradiction);

        GuardStats {
            pass_rate: outcome_rate(passes),
            retry_rate: outcome_rate(retries),
            soft_fail_rate: outcome_rate(soft_fails),
            fact_mutation_rate: total_rate(totals.tag_count(Tag::FactMutation)),
            persona_drift_rate: total_rate(drift),
            total_events: totals.total,
        }
    }

    /// Snapshot of the running totals.
    pub fn metrics(&self) -> BusMetrics {
        let state = self.state.lock().expect("bus state lock");
        let totals = &state.totals;
        BusMetrics {
            total_events: totals.total,
            positive_events: totals.positive,
            negative_events: totals.negative,
            avg_severity: totals.severity_mean,
            avg_confidence: totals.confidence_mean,
            by_source: totals
                .by_source
                .iter()
                .map(|(source, count)| (source.to_string(), *count))
                .collect(),
            by_stage: totals
                .by_stage
                .iter()
                .map(|(stage, count)| (stage.to_string(), *count))
                .collect(),
            by_tag: totals
                .by_tag
                .iter()
                .map(|(tag, count)| (tag.to_string(), *count))
                .collect(),
            negative_by_stage: totals
                .negative_by_stage
                .iter()
                .map(|(stage, count)| (stage.to_string(), *count))
                .collect(),
        }
    }

    /// Negative-valence count per stage, typed. Used by the dominance sweep.
    pub(crate) fn negative_stage_counts(&self) -> BTreeMap<Stage, u64> {
        let state = self.state.lock().expect("bus state lock");
        state.totals.negative_by_stage.clone()
    }

    /// Number of events currently retained in the bounded history.
    pub fn history_len(&self) -> usize {
        self.state.lock().expect("bus state lock").history.len()
    }

    /// Drop all history and totals. Used at session boundaries and in tests.
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("bus state lock");
        state.history.clear();
        state.totals = RunningTotals::default();
    }

    /// Reset the running totals while keeping the event history.
    pub fn reset_metrics(&self) {
        let mut state = self.state.lock().expect("bus state lock");
        state.totals = RunningTotals::default();
    }
}

impl Default for EvaluationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EvaluationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationBus")
            .field("history_len", &self.history_len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
