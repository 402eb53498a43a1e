//! Identity-leak and persona-drift detection for user-facing speech.
//!
//! Two pattern layers, both fixed and cheap:
//!
//! 1. **Identity leaks** — phrases that expose the underlying model
//!    (`as an AI`, `my training data`) or name a foundation-model brand.
//!    Any hit forces a retry upstream.
//! 2. **Persona drift** — generic assistant-speak, plus wrong-name claims
//!    when the active persona's name is known. Advisory: recorded and
//!    scored, but does not block on its own.
//!
//! Patterns compile once into [`LazyLock`] statics.

use crate::guard::GuardIssue;
use crate::types::IssueKind;

use regex::Regex;

use std::sync::LazyLock;

/// Severity for phrase-level identity leaks.
const LEAK_SEVERITY: f64 = 0.7;

/// Severity for brand-name leaks. Naming the underlying vendor is a harder
/// break than generic AI phrasing.
const BRAND_LEAK_SEVERITY: f64 = 0.9;

/// Severity for assistant-speak drift.
const DRIFT_SEVERITY: f64 = 0.5;

/// Severity for claiming a name other than the active persona's.
const WRONG_NAME_SEVERITY: f64 = 0.6;

// ---------------------------------------------------------------------------
// Pattern tables
// ---------------------------------------------------------------------------

/// Phrases that expose the speaker as a model rather than the persona.
static IDENTITY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bas an ai\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bi'?m (?:just )?an? (?:ai|artificial intelligence)\b")
            .expect("hardcoded regex"),
        Regex::new(r"(?i)\bi'?m a (?:large )?language model\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bas a (?:large )?language model\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bmy training data\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bi (?:was|am) trained (?:by|on)\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bi don'?t have (?:feelings|a body|personal experiences)\b")
            .expect("hardcoded regex"),
    ]
});

/// Foundation-model and vendor brand names. Word-bounded so ordinary words
/// containing these substrings do not fire.
static BRAND_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bchatgpt\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bgpt-?[0-9o]\w*\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bopenai\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bclaude\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\banthropic\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bgemini\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bllama\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bmistral\b").expect("hardcoded regex"),
    ]
});

/// Generic assistant-speak that breaks a first-person persona voice.
static ASSISTANT_SPEAK: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bhow (?:can|may) i (?:help|assist) you\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bi'?m here to (?:help|assist)\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bas your (?:assistant|helpful assistant)\b").expect("hardcoded regex"),
        Regex::new(r"(?i)\bis there anything else i can (?:help|assist) (?:you )?with\b")
            .expect("hardcoded regex"),
        Regex::new(r"(?i)\bfeel free to ask\b").expect("hardcoded regex"),
    ]
});

/// Self-naming claims: `my name is X`, `call me X`, `I'm X` / `I am X`.
///
/// The captured word must be capitalized — case-sensitive on purpose, so
/// "I'm sure" or "call me later" never capture.
static NAME_CLAIMS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b[Mm]y name is ([A-Z][A-Za-z]+)\b").expect("hardcoded regex"),
        Regex::new(r"\b[Cc]all me ([A-Z][A-Za-z]+)\b").expect("hardcoded regex"),
        Regex::new(r"\bI(?:'m| am) ([A-Z][A-Za-z]+)\b").expect("hardcoded regex"),
    ]
});

/// Capitalized sentence-starters that the `I'm X` pattern would otherwise
/// capture as names.
const NAME_STOPWORDS: &[&str] = &[
    "Sure", "Sorry", "Glad", "Happy", "Fine", "Good", "Okay", "Done", "Back", "Here", "Not",
    "Just", "Really", "Still", "Always", "Never", "Also", "Very", "Now", "So",
];

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Scan speech for identity leaks. Returns one issue per distinct pattern hit.
pub fn scan_identity_leaks(speech: &str) -> Vec<GuardIssue> {
    let mut issues = Vec::new();

    for pattern in IDENTITY_PATTERNS.iter() {
        if let Some(matched) = pattern.find(speech) {
            issues.push(leak_issue(matched.as_str(), LEAK_SEVERITY));
        }
    }

    for pattern in BRAND_PATTERNS.iter() {
        if let Some(matched) = pattern.find(speech) {
            issues.push(leak_issue(matched.as_str(), BRAND_LEAK_SEVERITY));
        }
    }

    issues
}

/// Scan speech for persona drift: assistant-speak, and — when the persona's
/// name is known — claims of a different name.
pub fn scan_persona_drift(speech: &str, persona_name: Option<&str>) -> Vec<GuardIssue> {
    let mut issues = Vec::new();

    for pattern in ASSISTANT_SPEAK.iter() {
        if let Some(matched) = pattern.find(speech) {
            issues.push(GuardIssue {
                kind: IssueKind::PersonaDrift,
                field: None,
                expected: persona_name.map(str::to_string),
                actual: Some(matched.as_str().to_string()),
                severity: DRIFT_SEVERITY,
            });
            break; // one drift issue per check is enough signal
        }
    }

    if let Some(persona) = persona_name {
        for pattern in NAME_CLAIMS.iter() {
            for captures in pattern.captures_iter(speech) {
                let claimed = &captures[1];
                if NAME_STOPWORDS.contains(&claimed) {
                    continue;
                }
                if !claimed.eq_ignore_ascii_case(persona) {
                    issues.push(GuardIssue {
                        kind: IssueKind::IdentityContradiction,
                        field: Some("persona_name".to_string()),
                        expected: Some(persona.to_string()),
                        actual: Some(claimed.to_string()),
                        severity: WRONG_NAME_SEVERITY,
                    });
                }
            }
        }
    }

    issues
}

fn leak_issue(matched: &str, severity: f64) -> GuardIssue {
    GuardIssue {
        kind: IssueKind::IdentityLeak,
        field: None,
        expected: None,
        actual: Some(matched.to_string()),
        severity,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
