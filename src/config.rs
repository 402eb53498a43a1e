//! Guard system configuration.
//!
//! A plain struct passed at construction time. There is no string-keyed
//! get/set layer: the only value that is meaningfully toggled at runtime is
//! the `enabled` kill switch, and callers that need that simply rebuild
//! their pipeline or flip the field on their own copy.

use serde::{Deserialize, Serialize};

/// Configuration for the guard pipeline and its feedback loops.
///
/// All fields have defaults tuned for single-conversation use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GuardConfig {
    /// Kill switch. When false, every pipeline entry point returns its input
    /// unchanged, synchronously, with zero side effects.
    pub enabled: bool,
    /// Whether missing required facts (or a missing echo altogether) force a
    /// retry. Off by default: casual turns often carry no echo.
    pub strict_facts: bool,
    /// Retry budget per turn sequence before falling back to the canned
    /// response.
    pub max_retries: u32,
    /// Sampling temperature for the first inference attempt.
    pub base_temperature: f64,
    /// Floor for the decayed retry temperature.
    pub min_temperature: f64,
    /// Aggregation window for bus signals, in milliseconds.
    pub signal_window_ms: u64,
    /// Consecutive non-PASS outcomes before a REPEATED_FAILURE architecture
    /// issue is logged.
    pub repeated_failure_threshold: u32,
    /// Chemistry bridge settings.
    pub chemistry: ChemistryConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict_facts: false,
            max_retries: 3,
            base_temperature: 0.7,
            min_temperature: 0.3,
            signal_window_ms: 5_000,
            repeated_failure_threshold: 5,
            chemistry: ChemistryConfig::default(),
        }
    }
}

/// Settings for mapping evaluation signals onto chemistry deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChemistryConfig {
    /// When false, the bridge returns zero deltas tagged `disabled`.
    pub enabled: bool,
    /// Per-call bound on the dopamine adjustment, in either direction.
    pub max_dopamine_delta: f64,
    /// Per-call bound on the serotonin adjustment, in either direction.
    pub max_serotonin_delta: f64,
}

impl Default for ChemistryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_dopamine_delta: 5.0,
            max_serotonin_delta: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_values() {
        let config = GuardConfig::default();
        assert!(config.enabled);
        assert!(!config.strict_facts);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_temperature, 0.7);
        assert_eq!(config.min_temperature, 0.3);
        assert_eq!(config.signal_window_ms, 5_000);
        assert_eq!(config.repeated_failure_threshold, 5);
        assert!(config.chemistry.enabled);
        assert_eq!(config.chemistry.max_dopamine_delta, 5.0);
        assert_eq!(config.chemistry.max_serotonin_delta, 2.0);
    }

    #[test]
    fn config_roundtrips_through_serde() {
        let config = GuardConfig {
            strict_facts: true,
            max_retries: 5,
            ..GuardConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: GuardConfig = serde_json::from_str(&json).unwrap();
        assert!(back.strict_facts);
        assert_eq!(back.max_retries, 5);
    }
}
