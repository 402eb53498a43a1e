//! Chemistry bridge: maps aggregated evaluation signals onto bounded deltas
//! for the simulated neurochemistry vector.
//!
//! Pure mapping only — the bridge reads the bus and produces ephemeral
//! [`ChemistryDelta`]s; persisting the resulting state is the caller's job.
//! Serotonin always trails dopamine at 30% magnitude and is never computed
//! independently; norepinephrine rises only on negative signal (arousal is
//! raised by trouble, never lowered by good news through this path).

use crate::bus::{EvaluationBus, EvaluationEvent, SubscriptionHandle, SIGNAL_SCALE};
use crate::config::{ChemistryConfig, GuardConfig};
use crate::SpeechguardError;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Serotonin follows dopamine at this fixed fraction.
const SEROTONIN_RATIO: f64 = 0.3;

/// Norepinephrine rises at this fraction of a negative dopamine delta.
const NOREPINEPHRINE_RATIO: f64 = 0.2;

/// Hard cap on a single norepinephrine adjustment.
const NOREPINEPHRINE_CAP: f64 = 2.0;

/// Neurochemistry channels live on a 0–100 scale.
const CHANNEL_MIN: f64 = 0.0;
const CHANNEL_MAX: f64 = 100.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where a delta came from, so callers can tell "nothing happened" apart
/// from "the bridge is off".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaSource {
    Disabled,
    NoEvents,
    Aggregated,
    Event,
}

/// One bounded adjustment to the three-channel state. Ephemeral: recomputed
/// every call, never stored by this subsystem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChemistryDelta {
    pub dopamine: f64,
    pub serotonin: f64,
    pub norepinephrine: f64,
    pub confidence: f64,
    pub source: DeltaSource,
}

impl ChemistryDelta {
    /// An all-zero delta carrying only its source discriminator.
    pub fn zero(source: DeltaSource) -> Self {
        Self {
            dopamine: 0.0,
            serotonin: 0.0,
            norepinephrine: 0.0,
            confidence: 0.0,
            source,
        }
    }
}

/// The caller-owned neurochemistry vector, one channel per transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChemistryState {
    pub dopamine: f64,
    pub serotonin: f64,
    pub norepinephrine: f64,
}

// ---------------------------------------------------------------------------
// Pure application
// ---------------------------------------------------------------------------

/// Apply a delta to a state, clamping every channel into `[0, 100]`.
/// Pure: the input state is untouched.
pub fn apply_delta(current: &ChemistryState, delta: &ChemistryDelta) -> ChemistryState {
    ChemistryState {
        dopamine: (current.dopamine + delta.dopamine).clamp(CHANNEL_MIN, CHANNEL_MAX),
        serotonin: (current.serotonin + delta.serotonin).clamp(CHANNEL_MIN, CHANNEL_MAX),
        norepinephrine: (current.norepinephrine + delta.norepinephrine)
            .clamp(CHANNEL_MIN, CHANNEL_MAX),
    }
}

// ---------------------------------------------------------------------------
// ChemistryBridge
// ---------------------------------------------------------------------------

/// Maps evaluation signals onto chemistry deltas, either by polling the
/// bus's trailing window or via an exclusive per-event push subscription.
pub struct ChemistryBridge {
    bus: Arc<EvaluationBus>,
    config: ChemistryConfig,
    window: Duration,
    push_active: Arc<AtomicBool>,
}

impl ChemistryBridge {
    pub fn new(bus: Arc<EvaluationBus>, config: &GuardConfig) -> Self {
        Self {
            bus,
            config: config.chemistry.clone(),
            window: Duration::milliseconds(config.signal_window_ms as i64),
            push_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Compute a delta from the bus's trailing aggregation window.
    ///
    /// Returns a zero delta tagged `disabled` when the bridge is off and
    /// `no_events` when the window is empty, so callers never mistake
    /// silence for a confident zero.
    pub fn delta_from_bus(&self) -> ChemistryDelta {
        if !self.config.enabled {
            return ChemistryDelta::zero(DeltaSource::Disabled);
        }

        let signal = self.bus.aggregated_signal(self.window);
        if signal.confidence == 0.0 {
            return ChemistryDelta::zero(DeltaSource::NoEvents);
        }

        shape_delta(
            signal.dopamine_delta,
            signal.confidence,
            DeltaSource::Aggregated,
            &self.config,
        )
    }

    /// Compute a delta from a single event, without windowing. The same
    /// formula shape as aggregation, for callers that want immediate
    /// reaction rather than periodic polling.
    pub fn delta_for_event(&self, event: &EvaluationEvent) -> ChemistryDelta {
        if !self.config.enabled {
            return ChemistryDelta::zero(DeltaSource::Disabled);
        }

        let raw = event.valence.sign()
            * event.severity
            * event.confidence
            * event.stage.signal_weight()
            * SIGNAL_SCALE;

        shape_delta(raw, event.confidence, DeltaSource::Event, &self.config)
    }

    /// Acquire the push subscription and deliver a per-event delta to
    /// `handler` on every emit.
    ///
    /// At most one push subscription may exist per bridge; a second
    /// `attach` fails with [`SpeechguardError::SubscriptionActive`] instead
    /// of silently evicting the first. Dropping the returned handle releases
    /// the slot and detaches from the bus.
    pub fn attach(
        &self,
        handler: impl Fn(ChemistryDelta) + Send + Sync + 'static,
    ) -> Result<ChemistrySubscription, SpeechguardError> {
        if self
            .push_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SpeechguardError::SubscriptionActive);
        }

        let config = self.config.clone();
        let handle = self.bus.subscribe(move |event| {
            let raw = event.valence.sign()
                * event.severity
                * event.confidence
                * event.stage.signal_weight()
                * SIGNAL_SCALE;
            handler(shape_delta(raw, event.confidence, DeltaSource::Event, &config));
        });

        Ok(ChemistrySubscription {
            bus: self.bus.clone(),
            push_active: self.push_active.clone(),
            handle: Some(handle),
        })
    }
}

impl std::fmt::Debug for ChemistryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChemistryBridge")
            .field("enabled", &self.config.enabled)
            .field("push_active", &self.push_active.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Bound the raw signal into the three channels.
fn shape_delta(
    raw: f64,
    confidence: f64,
    source: DeltaSource,
    config: &ChemistryConfig,
) -> ChemistryDelta {
    let norepinephrine = if raw < 0.0 {
        (raw.abs() * NOREPINEPHRINE_RATIO).min(NOREPINEPHRINE_CAP)
    } else {
        0.0
    };

    ChemistryDelta {
        dopamine: raw.clamp(-config.max_dopamine_delta, config.max_dopamine_delta),
        serotonin: (raw * SEROTONIN_RATIO)
            .clamp(-config.max_serotonin_delta, config.max_serotonin_delta),
        norepinephrine,
        confidence,
        source,
    }
}

// ---------------------------------------------------------------------------
// Push subscription handle
// ---------------------------------------------------------------------------

/// RAII handle for the exclusive push subscription. Dropping it detaches
/// the bus handler and frees the slot for a future `attach`.
pub struct ChemistrySubscription {
    bus: Arc<EvaluationBus>,
    push_active: Arc<AtomicBool>,
    handle: Option<SubscriptionHandle>,
}

impl Drop for ChemistrySubscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.bus.unsubscribe(handle);
        }
        self.push_active.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ChemistrySubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChemistrySubscription").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Source, Stage, Valence};

    use std::sync::Mutex;

    fn make_bridge(bus: &Arc<EvaluationBus>) -> ChemistryBridge {
        ChemistryBridge::new(bus.clone(), &GuardConfig::default())
    }

    fn emit_negative(bus: &EvaluationBus, stage: Stage, severity: f64) {
        bus.emit(EvaluationEvent::new(
            Source::Guard,
            stage,
            severity,
            Valence::Negative,
            vec![],
            1.0,
        ));
    }

    fn emit_positive(bus: &EvaluationBus, stage: Stage, severity: f64) {
        bus.emit(EvaluationEvent::new(
            Source::Guard,
            stage,
            severity,
            Valence::Positive,
            vec![],
            1.0,
        ));
    }

    // -- source discriminators --

    #[test]
    fn disabled_bridge_reports_disabled() {
        let bus = Arc::new(EvaluationBus::new());
        let config = GuardConfig {
            chemistry: ChemistryConfig {
                enabled: false,
                ..ChemistryConfig::default()
            },
            ..GuardConfig::default()
        };
        let bridge = ChemistryBridge::new(bus.clone(), &config);

        emit_negative(&bus, Stage::User, 0.9);
        let delta = bridge.delta_from_bus();
        assert_eq!(delta.source, DeltaSource::Disabled);
        assert_eq!(delta.dopamine, 0.0);
    }

    #[test]
    fn empty_window_reports_no_events() {
        let bus = Arc::new(EvaluationBus::new());
        let bridge = make_bridge(&bus);
        let delta = bridge.delta_from_bus();
        assert_eq!(delta.source, DeltaSource::NoEvents);
        assert_eq!(delta.confidence, 0.0);
    }

    // -- shaping --

    #[test]
    fn negative_signal_lowers_dopamine_and_raises_norepinephrine() {
        let bus = Arc::new(EvaluationBus::new());
        let bridge = make_bridge(&bus);
        emit_negative(&bus, Stage::User, 1.0);

        let delta = bridge.delta_from_bus();
        assert_eq!(delta.source, DeltaSource::Aggregated);
        // -1 x 1.0 x 1.0 x 0.15 x 50 = -7.5, clamped to -5.0.
        assert_eq!(delta.dopamine, -5.0);
        assert!(delta.norepinephrine > 0.0);
        assert!(delta.serotonin < 0.0);
    }

    #[test]
    fn positive_signal_never_raises_norepinephrine() {
        let bus = Arc::new(EvaluationBus::new());
        let bridge = make_bridge(&bus);
        emit_positive(&bus, Stage::User, 1.0);

        let delta = bridge.delta_from_bus();
        assert!(delta.dopamine > 0.0);
        assert_eq!(delta.norepinephrine, 0.0);
    }

    #[test]
    fn serotonin_is_thirty_percent_of_raw_dopamine() {
        let bus = Arc::new(EvaluationBus::new());
        let bridge = make_bridge(&bus);
        // -1 x 0.8 x 1.0 x 0.05 x 50 = -2.0: inside both clamp bounds.
        emit_negative(&bus, Stage::Guard, 0.8);

        let delta = bridge.delta_from_bus();
        assert!((delta.dopamine - -2.0).abs() < 1e-9);
        assert!((delta.serotonin - -0.6).abs() < 1e-9);
    }

    #[test]
    fn dopamine_clamps_to_the_configured_bound() {
        let bus = Arc::new(EvaluationBus::new());
        let bridge = make_bridge(&bus);
        emit_negative(&bus, Stage::User, 1.0); // raw -7.5

        let delta = bridge.delta_from_bus();
        assert_eq!(delta.dopamine, -5.0);
        // Serotonin clamps on its own bound, from the raw value: -2.25 -> -2.0.
        assert_eq!(delta.serotonin, -2.0);
    }

    #[test]
    fn norepinephrine_caps_at_two() {
        let config = GuardConfig::default();
        let shaped = shape_delta(-50.0, 1.0, DeltaSource::Event, &config.chemistry);
        assert_eq!(shaped.norepinephrine, 2.0);
    }

    // -- per-event deltas --

    #[test]
    fn per_event_delta_uses_the_event_alone() {
        let bus = Arc::new(EvaluationBus::new());
        let bridge = make_bridge(&bus);

        let event = EvaluationEvent::new(
            Source::User,
            Stage::Prism,
            0.8,
            Valence::Negative,
            vec![],
            0.5,
        );
        let delta = bridge.delta_for_event(&event);
        assert_eq!(delta.source, DeltaSource::Event);
        // -1 x 0.8 x 0.5 x 0.10 x 50 = -2.0
        assert!((delta.dopamine - -2.0).abs() < 1e-9);
        assert_eq!(delta.confidence, 0.5);
    }

    // -- apply_delta --

    #[test]
    fn apply_delta_clamps_to_channel_bounds() {
        let current = ChemistryState {
            dopamine: 98.0,
            serotonin: 1.0,
            norepinephrine: 99.5,
        };
        let delta = ChemistryDelta {
            dopamine: 5.0,
            serotonin: -3.0,
            norepinephrine: 2.0,
            confidence: 1.0,
            source: DeltaSource::Aggregated,
        };

        let next = apply_delta(&current, &delta);
        assert_eq!(next.dopamine, 100.0);
        assert_eq!(next.serotonin, 0.0);
        assert_eq!(next.norepinephrine, 100.0);
    }

    #[test]
    fn apply_delta_never_mutates_its_input() {
        let current = ChemistryState {
            dopamine: 50.0,
            serotonin: 50.0,
            norepinephrine: 50.0,
        };
        let delta = ChemistryDelta {
            dopamine: 3.0,
            serotonin: 1.0,
            norepinephrine: 0.5,
            confidence: 1.0,
            source: DeltaSource::Event,
        };

        let next = apply_delta(&current, &delta);
        assert_eq!(current.dopamine, 50.0);
        assert_eq!(next.dopamine, 53.0);
    }

    // -- push subscription --

    #[test]
    fn push_subscription_delivers_per_event_deltas() {
        let bus = Arc::new(EvaluationBus::new());
        let bridge = make_bridge(&bus);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let _subscription = bridge
            .attach(move |delta| sink.lock().unwrap().push(delta))
            .unwrap();

        emit_negative(&bus, Stage::Guard, 0.8);

        let deltas = received.lock().unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].source, DeltaSource::Event);
        assert!(deltas[0].dopamine < 0.0);
    }

    #[test]
    fn second_attach_fails_loudly() {
        let bus = Arc::new(EvaluationBus::new());
        let bridge = make_bridge(&bus);

        let _first = bridge.attach(|_| {}).unwrap();
        let second = bridge.attach(|_| {});
        assert!(matches!(second, Err(SpeechguardError::SubscriptionActive)));
    }

    #[test]
    fn dropping_the_subscription_frees_the_slot_and_detaches() {
        let bus = Arc::new(EvaluationBus::new());
        let bridge = make_bridge(&bus);

        let received = Arc::new(Mutex::new(0usize));
        let sink = received.clone();
        let subscription = bridge
            .attach(move |_| *sink.lock().unwrap() += 1)
            .unwrap();
        emit_negative(&bus, Stage::Guard, 0.5);
        drop(subscription);
        emit_negative(&bus, Stage::Guard, 0.5);

        assert_eq!(*received.lock().unwrap(), 1, "detached handler must not fire");
        assert!(bridge.attach(|_| {}).is_ok(), "slot should be free after drop");
    }
}
