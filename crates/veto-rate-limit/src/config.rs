use serde::{Deserialize, Serialize};
use veto_types::{secs_in_bounds, subsystems, MAX_CONFIG_SECS};

use crate::error::{RateLimitError, RateLimitResult};

// ── Limits ──────────────────────────────────────────────────────────────

/// Budget for one (subsystem, change kind) key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeLimits {
    /// Largest magnitude accepted in a single change.
    pub max_single_change: f64,
    /// Largest cumulative magnitude accepted per day.
    pub max_daily_change: f64,
    /// Length of the burst window (seconds).
    pub cooldown_seconds: u64,
    /// Changes permitted inside one cooldown window.
    pub burst_allowance: u32,
    /// Magnitude or daily total above which a risk escalation is recorded.
    pub risk_escalation_threshold: f64,
    /// Magnitude above which a human must approve.
    pub approval_required_threshold: f64,
}

impl ChangeLimits {
    pub fn new(max_single_change: f64, max_daily_change: f64) -> Self {
        Self {
            max_single_change,
            max_daily_change,
            cooldown_seconds: 3600,
            burst_allowance: 3,
            risk_escalation_threshold: max_daily_change * 0.8,
            approval_required_threshold: max_single_change * 0.8,
        }
    }

    pub fn with_cooldown(mut self, cooldown_seconds: u64, burst_allowance: u32) -> Self {
        self.cooldown_seconds = cooldown_seconds;
        self.burst_allowance = burst_allowance;
        self
    }

    pub fn with_thresholds(mut self, risk_escalation: f64, approval_required: f64) -> Self {
        self.risk_escalation_threshold = risk_escalation;
        self.approval_required_threshold = approval_required;
        self
    }

    /// Scale every magnitude bound by `factor`.
    pub(crate) fn scaled(&self, factor: f64) -> Self {
        Self {
            max_single_change: self.max_single_change * factor,
            max_daily_change: self.max_daily_change * factor,
            cooldown_seconds: self.cooldown_seconds,
            burst_allowance: self.burst_allowance,
            risk_escalation_threshold: self.risk_escalation_threshold * factor,
            approval_required_threshold: self.approval_required_threshold * factor,
        }
    }

    fn validate(&self, key: &str) -> RateLimitResult<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.max_single_change) || !positive(self.max_daily_change) {
            return Err(RateLimitError::InvalidConfig(format!(
                "{key}: caps must be positive and finite"
            )));
        }
        if self.max_single_change > self.max_daily_change {
            return Err(RateLimitError::InvalidConfig(format!(
                "{key}: max_single_change exceeds max_daily_change"
            )));
        }
        if !secs_in_bounds(self.cooldown_seconds) {
            return Err(RateLimitError::InvalidConfig(format!(
                "{key}: cooldown_seconds exceeds {MAX_CONFIG_SECS}"
            )));
        }
        if self.burst_allowance == 0 {
            return Err(RateLimitError::InvalidConfig(format!(
                "{key}: burst_allowance must be at least 1"
            )));
        }
        Ok(())
    }
}

/// Configured limits for one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeLimitEntry {
    pub subsystem: String,
    pub kind: String,
    #[serde(flatten)]
    pub limits: ChangeLimits,
}

impl ChangeLimitEntry {
    pub fn new(subsystem: impl Into<String>, kind: impl Into<String>, limits: ChangeLimits) -> Self {
        Self {
            subsystem: subsystem.into(),
            kind: kind.into(),
            limits,
        }
    }
}

/// Which changes count toward "today".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyWindow {
    /// The trailing 24 hours.
    Rolling24h,
    /// Since the most recent local midnight.
    LocalMidnight,
}

impl Default for DailyWindow {
    fn default() -> Self {
        Self::Rolling24h
    }
}

// ── Configuration ───────────────────────────────────────────────────────

/// Rate limiter configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub limits: Vec<ChangeLimitEntry>,
    pub daily_window: DailyWindow,
    /// Seconds an unconfirmed reservation holds budget.
    pub reservation_ttl_secs: u64,
    /// Divisor turning the 24h change count into a risk ratio.
    pub frequency_risk_divisor: f64,
    /// Maximum escalation and rejection records kept in memory.
    pub max_event_history: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limits: default_limits(),
            daily_window: DailyWindow::Rolling24h,
            reservation_ttl_secs: 300,
            frequency_risk_divisor: 10.0,
            max_event_history: 500,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> RateLimitResult<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.limits {
            let key = format!("{}/{}", entry.subsystem, entry.kind);
            if !seen.insert(key.clone()) {
                return Err(RateLimitError::InvalidConfig(format!("duplicate key {key}")));
            }
            entry.limits.validate(&key)?;
        }
        if self.reservation_ttl_secs == 0 || !secs_in_bounds(self.reservation_ttl_secs) {
            return Err(RateLimitError::InvalidConfig(format!(
                "reservation_ttl_secs must be in 1..={MAX_CONFIG_SECS}"
            )));
        }
        if !(self.frequency_risk_divisor.is_finite() && self.frequency_risk_divisor > 0.0) {
            return Err(RateLimitError::InvalidConfig(
                "frequency_risk_divisor must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Built-in limits for the well-known change kinds.
pub fn default_limits() -> Vec<ChangeLimitEntry> {
    use subsystems::*;

    vec![
        ChangeLimitEntry::new(
            PERSONALITY_EVOLUTION,
            "evolution",
            ChangeLimits::new(0.1, 0.25)
                .with_cooldown(3600, 3)
                .with_thresholds(0.2, 0.08),
        ),
        ChangeLimitEntry::new(
            PERSONALITY_EVOLUTION,
            "trait_adjustment",
            ChangeLimits::new(0.05, 0.15)
                .with_cooldown(7200, 2)
                .with_thresholds(0.1, 0.03),
        ),
        ChangeLimitEntry::new(
            SASS_ADJUSTMENT,
            "sass_level",
            ChangeLimits::new(0.2, 0.5)
                .with_cooldown(1800, 3)
                .with_thresholds(0.3, 0.15),
        ),
        ChangeLimitEntry::new(
            CODE_GENERATION,
            "generation",
            ChangeLimits::new(1.0, 10.0)
                .with_cooldown(300, 5)
                .with_thresholds(5.0, 0.5),
        ),
        ChangeLimitEntry::new(
            RESEARCH,
            "query",
            ChangeLimits::new(1.0, 50.0)
                .with_cooldown(60, 10)
                .with_thresholds(25.0, 5.0),
        ),
        ChangeLimitEntry::new(
            MEMORY,
            "write",
            ChangeLimits::new(1.0, 100.0)
                .with_cooldown(10, 20)
                .with_thresholds(50.0, 5.0),
        ),
    ]
}
