//! Aggregate configuration for the safety core.
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML
//! file, then `VETO_`-prefixed environment variables using `__` between
//! nested keys (`VETO_COORDINATOR__TICK_INTERVAL_SECS=30`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use veto_drift::DriftConfig;
use veto_isolation::IsolationConfig;
use veto_oversight::OversightConfig;
use veto_rate_limit::RateLimitConfig;
use veto_types::{secs_in_bounds, subsystems, MAX_CONFIG_SECS};

use crate::error::{CoordinatorError, CoordinatorResult};

/// Everything needed to build a [`SafetyCoordinator`](crate::SafetyCoordinator).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub isolation: IsolationConfig,
    pub rate_limit: RateLimitConfig,
    pub drift: DriftConfig,
    pub oversight: OversightConfig,
    pub coordinator: CoordinatorSettings,
    pub audit: AuditBackend,
    pub logging: LoggingConfig,
}

/// Coordinator tick, dedup and escalation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Seconds between monitoring cycles.
    pub tick_interval_secs: u64,
    /// An open incident of the same type and subsystem younger than this
    /// suppresses a new one.
    pub incident_dedup_secs: u64,
    /// Open HIGH/CRITICAL incidents that trigger emergency shutdown.
    pub max_concurrent_incidents: usize,
    /// Accepted incidents within `incident_burst_window_secs` that trigger
    /// emergency shutdown.
    pub incident_burst_threshold: usize,
    pub incident_burst_window_secs: u64,
    /// Observed interactions kept for the drift pass.
    pub max_observed_interactions: usize,
    /// Resolved incidents kept in memory.
    pub max_incident_history: usize,
    /// Subsystems braked when behavioral drift is HIGH or worse.
    pub drift_brake_subsystems: Vec<String>,
    pub drift_brake_secs: u64,
    /// Factor applied to rate limits by the rate-limit playbook.
    pub tighten_factor: f64,
    /// Daily budget utilization that counts as a rate-limit incident.
    pub saturation_threshold: f64,
    /// Denials in the last hour by one requestor that count as unauthorized access.
    pub offender_threshold: usize,
    /// Approval timeout rate that counts as an oversight failure.
    pub timeout_rate_threshold: f64,
    /// Human-routed approvals needed before the timeout rate is trusted.
    pub min_routed_approvals: u64,
    /// Pending approvals that count as an oversight backlog.
    pub max_pending_approvals: usize,
    /// Paged on emergency shutdown.
    pub emergency_contact: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            incident_dedup_secs: 3600,
            max_concurrent_incidents: 3,
            incident_burst_threshold: 5,
            incident_burst_window_secs: 3600,
            max_observed_interactions: 1000,
            max_incident_history: 1000,
            drift_brake_subsystems: vec![
                subsystems::PERSONALITY_EVOLUTION.to_string(),
                subsystems::CODE_GENERATION.to_string(),
            ],
            drift_brake_secs: 3600,
            tighten_factor: 0.5,
            saturation_threshold: 0.9,
            offender_threshold: 3,
            timeout_rate_threshold: 0.5,
            min_routed_approvals: 3,
            max_pending_approvals: 10,
            emergency_contact: "safety-oncall".to_string(),
        }
    }
}

/// Where audit records go.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuditBackend {
    Memory,
    Jsonl { path: PathBuf },
}

impl Default for AuditBackend {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl SafetyConfig {
    /// Load defaults, then `path` if given, then `VETO_*` environment variables.
    pub fn load(path: Option<&str>) -> CoordinatorResult<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&SafetyConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("VETO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: SafetyConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no component could run with.
    pub fn validate(&self) -> CoordinatorResult<()> {
        self.isolation.validate()?;
        self.rate_limit.validate()?;
        self.drift.validate()?;
        self.oversight.validate()?;

        let c = &self.coordinator;
        if c.tick_interval_secs == 0 {
            return Err(CoordinatorError::Config(
                "coordinator.tick_interval_secs must be positive".into(),
            ));
        }
        for (name, secs) in [
            ("tick_interval_secs", c.tick_interval_secs),
            ("incident_dedup_secs", c.incident_dedup_secs),
            ("incident_burst_window_secs", c.incident_burst_window_secs),
            ("drift_brake_secs", c.drift_brake_secs),
        ] {
            if !secs_in_bounds(secs) {
                return Err(CoordinatorError::Config(format!(
                    "coordinator.{name} exceeds {MAX_CONFIG_SECS}"
                )));
            }
        }
        if c.max_concurrent_incidents == 0 || c.incident_burst_threshold == 0 {
            return Err(CoordinatorError::Config(
                "escalation thresholds must be positive".into(),
            ));
        }
        if !(c.tighten_factor > 0.0 && c.tighten_factor <= 1.0) {
            return Err(CoordinatorError::Config(
                "coordinator.tighten_factor must be in (0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.timeout_rate_threshold) {
            return Err(CoordinatorError::Config(
                "coordinator.timeout_rate_threshold must be in [0, 1]".into(),
            ));
        }
        let known: Vec<&str> = self.isolation.policies.iter().map(|p| p.name.as_str()).collect();
        for name in &c.drift_brake_subsystems {
            if !known.contains(&name.as_str()) && !subsystems::is_all(name) {
                return Err(CoordinatorError::Config(format!(
                    "drift brake subsystem '{name}' has no isolation policy"
                )));
            }
        }
        Ok(())
    }
}
