//! Fact-echo extraction and comparison.
//!
//! The generator is asked to restate current facts in a structured
//! `fact_echo` block inside its own output. This module locates that block,
//! separates it from the user-facing speech, and mechanically compares every
//! authoritative fact against the echoed value — numeric tolerance instead
//! of semantic judgment.
//!
//! Three output shapes are accepted:
//!
//! 1. The whole output is a JSON object with `speech` / `fact_echo` members
//!    (and possibly `internal_thought`, which is never inspected).
//! 2. Plain text with an embedded `"fact_echo": { … }` member, located by
//!    key scan with balanced-brace extraction.
//! 3. Plain text with no echo at all.

use crate::facts::{FactSnapshot, FactValue, TIME_FACT};
use crate::guard::GuardIssue;
use crate::types::IssueKind;

use serde_json::Value;

use std::collections::BTreeMap;

/// Facts that must appear in the echo when strict fact checking is on.
pub const REQUIRED_FACTS: &[&str] = &[TIME_FACT];

/// Relative tolerance for numeric fact comparison.
const NUMERIC_TOLERANCE: f64 = 0.01;

/// Severity recorded for a mutated fact. The single highest-priority class.
const MUTATION_SEVERITY: f64 = 0.8;

/// Severity recorded for a missing optional fact.
const APPROXIMATION_SEVERITY: f64 = 0.3;

// ---------------------------------------------------------------------------
// Model output parsing
// ---------------------------------------------------------------------------

/// A generated response split into the checked surface and the echo block.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// The user-facing speech — the only text the guard ever inspects.
    pub speech: String,
    /// The self-reported fact restatement, when present.
    pub fact_echo: Option<BTreeMap<String, Value>>,
}

impl ModelOutput {
    /// Split raw generator output into speech and fact echo.
    ///
    /// `internal_thought` and any other structured members are deliberately
    /// dropped here: internal reasoning may legitimately reference raw
    /// facts, tool tags, or mistakes, and must never be checked.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        // Shape 1: the whole output is a JSON object.
        if trimmed.starts_with('{')
            && let Ok(Value::Object(object)) = serde_json::from_str::<Value>(trimmed)
        {
            let speech = object
                .get("speech")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let fact_echo = object.get("fact_echo").and_then(Value::as_object).map(|map| {
                map.iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            });
            return Self { speech, fact_echo };
        }

        // Shape 2: an echo object embedded in otherwise-plain text.
        if let Some(echo) = extract_embedded_echo(raw) {
            return Self {
                speech: raw.to_string(),
                fact_echo: Some(echo),
            };
        }

        // Shape 3: plain speech, no echo.
        Self {
            speech: raw.to_string(),
            fact_echo: None,
        }
    }
}

/// Locate a `"fact_echo": { … }` member inside plain text and parse the
/// balanced-brace object that follows the key.
fn extract_embedded_echo(text: &str) -> Option<BTreeMap<String, Value>> {
    let key_position = text.find("\"fact_echo\"")?;
    let after_key = &text[key_position + "\"fact_echo\"".len()..];
    let colon = after_key.find(':')?;
    let after_colon = after_key[colon + 1..].trim_start();
    if !after_colon.starts_with('{') {
        return None;
    }

    let object_text = balanced_object(after_colon)?;
    match serde_json::from_str::<Value>(object_text) {
        Ok(Value::Object(map)) => Some(map.into_iter().collect()),
        _ => None,
    }
}

/// Return the prefix of `text` covering one balanced `{ … }` object,
/// honoring braces inside string literals.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, character) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match character {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=index]);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Result of comparing an echo against the authoritative snapshot.
#[derive(Debug, Clone, Default)]
pub struct EchoReport {
    pub issues: Vec<GuardIssue>,
    /// Authoritative keys absent from the echo.
    pub missing_facts: Vec<String>,
    /// Authoritative keys echoed with a different value.
    pub mutated_facts: Vec<String>,
    /// Whether any fact in the required set was missing.
    pub missing_required: bool,
    /// Whether an echo block was present at all.
    pub echo_present: bool,
}

/// Compare each authoritative fact against the echoed value.
///
/// Extra echoed keys not present in the snapshot are ignored — the
/// generator is allowed to restate more than it was given, just not to
/// alter what it was given.
pub fn check_fact_echo(snapshot: &FactSnapshot, output: &ModelOutput) -> EchoReport {
    let mut report = EchoReport {
        echo_present: output.fact_echo.is_some(),
        ..EchoReport::default()
    };

    let Some(echo) = &output.fact_echo else {
        return report;
    };

    for (key, authoritative) in snapshot.iter() {
        let Some(echoed) = echo.get(key) else {
            report.missing_facts.push(key.clone());
            if REQUIRED_FACTS.contains(&key.as_str()) {
                report.missing_required = true;
            }
            report.issues.push(GuardIssue {
                kind: IssueKind::FactApproximation,
                field: Some(key.clone()),
                expected: Some(authoritative.as_text()),
                actual: None,
                severity: APPROXIMATION_SEVERITY,
            });
            continue;
        };

        if !values_match(authoritative, echoed) {
            report.mutated_facts.push(key.clone());
            report.issues.push(GuardIssue {
                kind: IssueKind::FactMutation,
                field: Some(key.clone()),
                expected: Some(authoritative.as_text()),
                actual: Some(render_echoed(echoed)),
                severity: MUTATION_SEVERITY,
            });
        }
    }

    report
}

/// Whether an echoed JSON value agrees with the authoritative fact.
///
/// Numeric facts accept numbers and numeric strings within a relative
/// tolerance band; textual facts require exact equality after trimming.
fn values_match(authoritative: &FactValue, echoed: &Value) -> bool {
    match authoritative {
        FactValue::Number(expected) => match echoed_number(echoed) {
            Some(actual) => within_tolerance(*expected, actual),
            None => false,
        },
        FactValue::Text(expected) => match echoed {
            Value::String(actual) => expected.trim() == actual.trim(),
            // A numeric echo of a numeric-looking text fact still counts.
            Value::Number(actual) => expected
                .trim()
                .parse::<f64>()
                .is_ok_and(|parsed| {
                    actual.as_f64().is_some_and(|a| within_tolerance(parsed, a))
                }),
            _ => false,
        },
    }
}

/// Pull a numeric reading out of an echoed value, coercing numeric strings.
fn echoed_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Relative tolerance check with an absolute floor of `NUMERIC_TOLERANCE`
/// for magnitudes below one, so near-zero facts do not demand bit equality.
fn within_tolerance(expected: f64, actual: f64) -> bool {
    let tolerance = NUMERIC_TOLERANCE * expected.abs().max(1.0);
    (expected - actual).abs() <= tolerance
}

fn render_echoed(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_energy(energy: f64) -> FactSnapshot {
        FactSnapshot::builder()
            .energy(energy)
            .build_with_time("2026-08-07 12:00")
    }

    fn output_with_echo(echo: serde_json::Value) -> ModelOutput {
        ModelOutput::parse(
            &serde_json::json!({ "speech": "all steady here", "fact_echo": echo }).to_string(),
        )
    }

    // -- parsing --

    #[test]
    fn parse_full_json_separates_speech_and_echo() {
        let raw = serde_json::json!({
            "speech": "feeling fine",
            "internal_thought": "I'm a language model pretending otherwise",
            "fact_echo": { "energy": 23 }
        })
        .to_string();

        let output = ModelOutput::parse(&raw);
        assert_eq!(output.speech, "feeling fine");
        let echo = output.fact_echo.unwrap();
        assert_eq!(echo["energy"], serde_json::json!(23));
    }

    #[test]
    fn parse_plain_text_has_no_echo() {
        let output = ModelOutput::parse("just chatting, nothing structured");
        assert_eq!(output.speech, "just chatting, nothing structured");
        assert!(output.fact_echo.is_none());
    }

    #[test]
    fn parse_embedded_echo_in_plain_text() {
        let raw = r#"Here's where things stand. "fact_echo": {"energy": 23, "time": "2026-08-07 12:00"} — all good."#;
        let output = ModelOutput::parse(raw);
        let echo = output.fact_echo.expect("embedded echo should be found");
        assert_eq!(echo["energy"], serde_json::json!(23));
    }

    #[test]
    fn parse_embedded_echo_handles_nested_braces_in_strings() {
        let raw = r#"note "fact_echo": {"label": "curly {brace} text", "energy": 5}"#;
        let output = ModelOutput::parse(raw);
        let echo = output.fact_echo.unwrap();
        assert_eq!(echo["label"], serde_json::json!("curly {brace} text"));
    }

    #[test]
    fn parse_malformed_embedded_echo_is_treated_as_plain_text() {
        let output = ModelOutput::parse(r#"broken "fact_echo": {"energy": 23"#);
        assert!(output.fact_echo.is_none());
    }

    // -- numeric comparison --

    #[test]
    fn matching_facts_produce_no_issues() {
        let report = check_fact_echo(
            &snapshot_with_energy(23.0),
            &output_with_echo(serde_json::json!({ "energy": 23, "time": "2026-08-07 12:00" })),
        );
        assert!(report.issues.is_empty());
        assert!(report.mutated_facts.is_empty());
        assert!(report.missing_facts.is_empty());
    }

    #[test]
    fn value_inside_tolerance_band_passes() {
        let report = check_fact_echo(
            &snapshot_with_energy(23.0),
            &output_with_echo(serde_json::json!({ "energy": 23.001, "time": "2026-08-07 12:00" })),
        );
        assert!(report.mutated_facts.is_empty());
    }

    #[test]
    fn value_outside_tolerance_band_is_a_mutation() {
        let report = check_fact_echo(
            &snapshot_with_energy(23.0),
            &output_with_echo(serde_json::json!({ "energy": 23.5, "time": "2026-08-07 12:00" })),
        );
        assert_eq!(report.mutated_facts, vec!["energy"]);
        let issue = &report.issues[0];
        assert_eq!(issue.kind, IssueKind::FactMutation);
        assert_eq!(issue.severity, 0.8);
        assert_eq!(issue.expected.as_deref(), Some("23"));
    }

    #[test]
    fn numeric_string_echo_coerces() {
        let report = check_fact_echo(
            &snapshot_with_energy(23.0),
            &output_with_echo(serde_json::json!({ "energy": "23", "time": "2026-08-07 12:00" })),
        );
        assert!(report.mutated_facts.is_empty());
    }

    #[test]
    fn non_numeric_echo_of_numeric_fact_is_a_mutation() {
        let report = check_fact_echo(
            &snapshot_with_energy(23.0),
            &output_with_echo(serde_json::json!({ "energy": "plenty", "time": "2026-08-07 12:00" })),
        );
        assert_eq!(report.mutated_facts, vec!["energy"]);
    }

    #[test]
    fn near_zero_facts_use_the_absolute_floor() {
        let snapshot = FactSnapshot::builder()
            .fact("drift", 0.0)
            .build_with_time("2026-08-07 12:00");
        let close = output_with_echo(serde_json::json!({ "drift": 0.005, "time": "2026-08-07 12:00" }));
        let far = output_with_echo(serde_json::json!({ "drift": 0.5, "time": "2026-08-07 12:00" }));

        assert!(check_fact_echo(&snapshot, &close).mutated_facts.is_empty());
        assert_eq!(check_fact_echo(&snapshot, &far).mutated_facts, vec!["drift"]);
    }

    // -- textual comparison --

    #[test]
    fn text_fact_requires_exact_match_after_trim() {
        let snapshot = FactSnapshot::builder()
            .fact("mood", "steady")
            .build_with_time("2026-08-07 12:00");

        let same = output_with_echo(
            serde_json::json!({ "mood": " steady ", "time": "2026-08-07 12:00" }),
        );
        assert!(check_fact_echo(&snapshot, &same).mutated_facts.is_empty());

        let different =
            output_with_echo(serde_json::json!({ "mood": "frantic", "time": "2026-08-07 12:00" }));
        assert_eq!(check_fact_echo(&snapshot, &different).mutated_facts, vec!["mood"]);
    }

    #[test]
    fn numeric_echo_of_numeric_text_fact_matches() {
        // The snapshot may carry "23" as text (e.g. prices injected as strings).
        let snapshot = FactSnapshot::builder()
            .fact("btc_price", "45000")
            .build_with_time("2026-08-07 12:00");
        let output =
            output_with_echo(serde_json::json!({ "btc_price": 45000, "time": "2026-08-07 12:00" }));
        assert!(check_fact_echo(&snapshot, &output).mutated_facts.is_empty());
    }

    // -- missing and extra keys --

    #[test]
    fn missing_optional_fact_is_an_approximation() {
        let report = check_fact_echo(
            &snapshot_with_energy(23.0),
            &output_with_echo(serde_json::json!({ "time": "2026-08-07 12:00" })),
        );
        assert_eq!(report.missing_facts, vec!["energy"]);
        assert!(!report.missing_required);
        assert_eq!(report.issues[0].kind, IssueKind::FactApproximation);
        assert_eq!(report.issues[0].severity, 0.3);
    }

    #[test]
    fn missing_time_flags_required() {
        let report = check_fact_echo(
            &snapshot_with_energy(23.0),
            &output_with_echo(serde_json::json!({ "energy": 23 })),
        );
        assert!(report.missing_required);
        assert!(report.missing_facts.contains(&"time".to_string()));
    }

    #[test]
    fn extra_echoed_keys_are_ignored() {
        let report = check_fact_echo(
            &snapshot_with_energy(23.0),
            &output_with_echo(serde_json::json!({
                "energy": 23,
                "time": "2026-08-07 12:00",
                "vibes": "immaculate"
            })),
        );
        assert!(report.issues.is_empty());
    }

    #[test]
    fn absent_echo_reports_nothing_but_flags_absence() {
        let report = check_fact_echo(
            &snapshot_with_energy(23.0),
            &ModelOutput::parse("no structure here at all"),
        );
        assert!(!report.echo_present);
        assert!(report.issues.is_empty());
    }
}
