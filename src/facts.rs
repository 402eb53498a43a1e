//! Hard fact snapshots: the authoritative ground truth for a single turn.
//!
//! A `FactSnapshot` is built once per turn from system-computed state (wall
//! clock, energy, neurochemistry readings, injected world facts) and is never
//! altered afterwards — the guard only compares against it. Keys with no
//! value are omitted entirely rather than stored as nulls, so the snapshot
//! can be handed to telemetry consumers as-is.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

/// Format used for the `time` fact stamped into every snapshot.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// The key every snapshot carries.
pub const TIME_FACT: &str = "time";

// ---------------------------------------------------------------------------
// FactValue
// ---------------------------------------------------------------------------

/// A single authoritative fact value.
///
/// Serializes untagged so numbers stay numbers and strings stay strings on
/// the wire, matching what downstream consumers already expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Number(f64),
    Text(String),
}

impl FactValue {
    /// The numeric reading, coercing numeric strings (`"23"` is `23`).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }

    /// The textual reading; numbers render with their shortest form.
    pub fn as_text(&self) -> String {
        match self {
            Self::Number(value) => {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    format!("{}", *value as i64)
                } else {
                    format!("{value}")
                }
            }
            Self::Text(text) => text.clone(),
        }
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

// ---------------------------------------------------------------------------
// FactSnapshot
// ---------------------------------------------------------------------------

/// Immutable map of system-known facts for the current turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactSnapshot {
    facts: BTreeMap<String, FactValue>,
}

impl FactSnapshot {
    /// Start building a snapshot. `build` stamps the current time.
    pub fn builder() -> FactSnapshotBuilder {
        FactSnapshotBuilder {
            facts: BTreeMap::new(),
        }
    }

    /// An empty snapshot with no facts at all, including no time stamp.
    ///
    /// Only meaningful for callers that have genuinely nothing to assert;
    /// the guard treats an empty snapshot as "nothing to check".
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FactValue> {
        self.facts.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.facts.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FactValue)> {
        self.facts.iter()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Accumulates facts for a snapshot. Pure and infallible: invalid inputs are
/// omitted, never stored as placeholders.
#[derive(Debug)]
pub struct FactSnapshotBuilder {
    facts: BTreeMap<String, FactValue>,
}

impl FactSnapshotBuilder {
    /// Record a fact under `key`.
    pub fn fact(mut self, key: impl Into<String>, value: impl Into<FactValue>) -> Self {
        self.facts.insert(key.into(), value.into());
        self
    }

    /// Record a fact only when a value is present; `None` omits the key.
    pub fn maybe_fact(
        self,
        key: impl Into<String>,
        value: Option<impl Into<FactValue>>,
    ) -> Self {
        match value {
            Some(value) => self.fact(key, value),
            None => self,
        }
    }

    /// Record the current energy reading.
    pub fn energy(self, value: f64) -> Self {
        self.fact("energy", value)
    }

    /// Record the three neurochemistry channel readings.
    pub fn neurochemistry(self, dopamine: f64, serotonin: f64, norepinephrine: f64) -> Self {
        self.fact("dopamine", dopamine)
            .fact("serotonin", serotonin)
            .fact("norepinephrine", norepinephrine)
    }

    /// Finalize, stamping the current wall-clock time unless the caller
    /// already supplied one.
    pub fn build(self) -> FactSnapshot {
        self.build_with_time(Utc::now().format(TIME_FORMAT).to_string())
    }

    /// Finalize with an explicit time string. Used by callers that already
    /// rendered a clock for the prompt, and by tests.
    pub fn build_with_time(mut self, time: impl Into<String>) -> FactSnapshot {
        self.facts
            .entry(TIME_FACT.to_string())
            .or_insert_with(|| FactValue::Text(time.into()));
        FactSnapshot { facts: self.facts }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
