//! # veto-types
//!
//! Shared vocabulary for the Veto safety core.
//!
//! Every governance component grades its findings on the same four-step
//! scale, so isolation violations, rate-limit risk, drift concern and
//! incident severity can be compared and escalated without conversions.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};

// ── Severity ────────────────────────────────────────────────────────────

/// Four-step grading shared by every component.
///
/// Ordered: `Low < Medium < High < Critical`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Risk grading used by the rate limiter and approval workflow.
pub type RiskLevel = Severity;

/// Concern grading used by the drift monitor.
pub type ConcernLevel = Severity;

impl Severity {
    /// Whether this is `High` or `Critical`.
    pub fn is_elevated(&self) -> bool {
        *self >= Severity::High
    }

    /// Lower-case label, e.g. `"critical"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Low
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Urgency ─────────────────────────────────────────────────────────────

/// How quickly a requester needs an approval decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Urgency {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ── Time bounds ─────────────────────────────────────────────────────────

/// Longest window, timeout or hold any configuration may request (one year).
pub const MAX_CONFIG_SECS: u64 = 366 * 24 * 60 * 60;

/// Whether `secs` is a usable configured duration.
pub fn secs_in_bounds(secs: u64) -> bool {
    secs <= MAX_CONFIG_SECS
}

// ── Subsystems ──────────────────────────────────────────────────────────

/// Well-known subsystem names.
pub mod subsystems {
    pub const PERSONALITY_EVOLUTION: &str = "personality_evolution";
    pub const SASS_ADJUSTMENT: &str = "sass_adjustment";
    pub const CODE_GENERATION: &str = "code_generation";
    pub const RESEARCH: &str = "research";
    pub const MEMORY: &str = "memory";
    pub const CONVERSATION: &str = "conversation";

    /// Sentinel target meaning "every registered subsystem".
    pub const ALL: &str = "all";

    /// Whether `name` is the `"all"` sentinel.
    pub fn is_all(name: &str) -> bool {
        name.eq_ignore_ascii_case(ALL)
    }
}
